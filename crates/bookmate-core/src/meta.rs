//! Identity of a data source.
//!
//! A `DatabaseMeta` is immutable once built. Two metas describe the same data
//! source when their urls match; the display name is presentation only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

/// Optional actions a provider can perform on a data source it described.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaAction {
    CheckExists,
    GetSize,
    OpenExternally,
}

#[derive(Debug, Clone)]
pub struct DatabaseMeta {
    url: String,
    name: String,
    provider_id: String,
    actions: BTreeSet<MetaAction>,
}

impl DatabaseMeta {
    pub fn new(
        url: impl Into<String>,
        name: impl Into<String>,
        provider_id: impl Into<String>,
        actions: impl IntoIterator<Item = MetaAction>,
    ) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            provider_id: provider_id.into(),
            actions: actions.into_iter().collect(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn supports(&self, action: MetaAction) -> bool {
        self.actions.contains(&action)
    }

    pub fn to_entry(&self) -> SavedDatabaseEntry {
        SavedDatabaseEntry {
            provider: self.provider_id.clone(),
            url: self.url.clone(),
        }
    }
}

impl PartialEq for DatabaseMeta {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for DatabaseMeta {}

impl Hash for DatabaseMeta {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

impl std::fmt::Display for DatabaseMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

/// Persisted form of a known data source: which provider understands it and where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedDatabaseEntry {
    pub provider: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equality_ignores_display_name() {
        let a = DatabaseMeta::new("/tmp/books.json", "Books", "bookmate.local", []);
        let b = DatabaseMeta::new("/tmp/books.json", "My library", "bookmate.local", []);
        let c = DatabaseMeta::new("/tmp/other.json", "Books", "bookmate.local", []);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn entry_keeps_provider_and_url() {
        let meta = DatabaseMeta::new(
            "/tmp/books.json",
            "Books",
            "bookmate.secure",
            [MetaAction::CheckExists],
        );
        assert!(meta.supports(MetaAction::CheckExists));
        assert!(!meta.supports(MetaAction::OpenExternally));
        assert_eq!(
            meta.to_entry(),
            SavedDatabaseEntry {
                provider: "bookmate.secure".to_string(),
                url: "/tmp/books.json".to_string(),
            }
        );
    }
}
