//! Persisted login preferences: known databases, the selected one, and
//! optional auto-login credentials.

use crate::error::SelectionError;
use crate::meta::{DatabaseMeta, SavedDatabaseEntry};
use crate::preferences::Preferences;
use crate::provider::{Credentials, ProviderRegistry};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

pub const LOGIN_DATA_KEY: &str = "login_data_2_0";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginData {
    saved_databases: Vec<DatabaseMeta>,
    selected: Option<usize>,
    auto_login: bool,
    auto_login_credentials: Credentials,
}

/// JSON shape of [`LoginData`]. Missing or null fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginDataRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub saved_databases: Vec<SavedDatabaseEntry>,
    #[serde(default)]
    pub selected_database_index: Option<usize>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub auto_login: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_login_credentials: Option<Credentials>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl LoginData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved_databases(&self) -> &[DatabaseMeta] {
        &self.saved_databases
    }

    pub fn selected_database(&self) -> Option<&DatabaseMeta> {
        self.selected.and_then(|idx| self.saved_databases.get(idx))
    }

    pub fn selected_database_index(&self) -> Option<usize> {
        self.selected
    }

    /// Selects one of the saved databases, or clears the selection with `None`.
    /// State is left untouched when `meta` is not saved.
    pub fn set_selected_database(
        &mut self,
        meta: Option<&DatabaseMeta>,
    ) -> Result<(), SelectionError> {
        match meta {
            None => {
                self.selected = None;
                Ok(())
            }
            Some(meta) => {
                let idx = self
                    .saved_databases
                    .iter()
                    .position(|saved| saved == meta)
                    .ok_or_else(|| SelectionError {
                        url: meta.url().to_string(),
                    })?;
                self.selected = Some(idx);
                Ok(())
            }
        }
    }

    pub fn is_auto_login(&self) -> bool {
        self.auto_login
    }

    pub fn set_auto_login(&mut self, enabled: bool) {
        self.auto_login = enabled;
    }

    pub fn auto_login_credentials(&self) -> &Credentials {
        &self.auto_login_credentials
    }

    pub fn set_auto_login_credentials(&mut self, credentials: Credentials) {
        self.auto_login_credentials = credentials;
    }

    /// Appends `meta` to the saved list if no entry with the same url exists.
    pub fn remember(&mut self, meta: &DatabaseMeta) -> bool {
        if self.saved_databases.contains(meta) {
            return false;
        }
        self.saved_databases.push(meta.clone());
        true
    }

    /// Drops `meta` from the saved list; the selection follows its entry or
    /// is cleared if the selected entry itself was removed.
    pub fn forget(&mut self, meta: &DatabaseMeta) -> bool {
        let Some(idx) = self.saved_databases.iter().position(|saved| saved == meta) else {
            return false;
        };
        self.saved_databases.remove(idx);
        self.selected = match self.selected {
            Some(selected) if selected == idx => None,
            Some(selected) if selected > idx => Some(selected - 1),
            other => other,
        };
        if self.selected.is_none() {
            self.auto_login = false;
        }
        true
    }

    pub fn to_record(&self) -> LoginDataRecord {
        LoginDataRecord {
            saved_databases: self
                .saved_databases
                .iter()
                .map(DatabaseMeta::to_entry)
                .collect(),
            selected_database_index: self.selected,
            auto_login: self.auto_login,
            auto_login_credentials: self
                .auto_login
                .then(|| self.auto_login_credentials.clone()),
        }
    }

    /// Rebuilds login data, skipping entries whose provider is unknown.
    pub fn from_record(record: LoginDataRecord, registry: &ProviderRegistry) -> Self {
        let mut saved_databases = Vec::with_capacity(record.saved_databases.len());
        let mut selected = None;
        for (idx, entry) in record.saved_databases.iter().enumerate() {
            let Some(meta) = registry.resolve(entry) else {
                continue;
            };
            let kept = match saved_databases.iter().position(|saved| saved == &meta) {
                Some(existing) => existing,
                None => {
                    saved_databases.push(meta);
                    saved_databases.len() - 1
                }
            };
            if record.selected_database_index == Some(idx) {
                selected = Some(kept);
            }
        }
        if record.selected_database_index.is_some() && selected.is_none() {
            warn!(
                index = ?record.selected_database_index,
                "Selected database could not be restored; clearing selection"
            );
        }
        let auto_login = record.auto_login && selected.is_some();
        Self {
            saved_databases,
            selected,
            auto_login,
            auto_login_credentials: record.auto_login_credentials.unwrap_or_default(),
        }
    }

    pub fn load(preferences: &Preferences, registry: &ProviderRegistry) -> Self {
        preferences
            .get::<LoginDataRecord>(LOGIN_DATA_KEY)
            .map(|record| Self::from_record(record, registry))
            .unwrap_or_default()
    }

    pub fn store(&self, preferences: &mut Preferences) -> serde_json::Result<()> {
        preferences.set(LOGIN_DATA_KEY, &self.to_record())
    }
}
