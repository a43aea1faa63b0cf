//! Typed key/value preference store persisted as a single JSON object.
//!
//! Loading never fails: a missing file starts empty, and an unreadable or
//! corrupt one starts empty too while remembering why, so the shell can tell
//! the user once. Values with an outdated shape read back as `None`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Preferences {
    path: PathBuf,
    values: Map<String, Value>,
    load_error: Option<String>,
    dirty: bool,
}

impl Preferences {
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            values: Map::new(),
            load_error: None,
            dirty: false,
        }
    }

    pub fn load(path: &Path) -> Self {
        let mut prefs = Self {
            path: path.to_path_buf(),
            ..Self::in_memory()
        };
        let contents = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No preference file yet; starting empty");
                return prefs;
            }
            Err(err) => {
                warn!(path = %path.display(), "Failed to read preferences: {err}");
                prefs.load_error = Some(err.to_string());
                return prefs;
            }
        };
        match serde_json::from_str::<Map<String, Value>>(&contents) {
            Ok(values) => {
                info!(path = %path.display(), keys = values.len(), "Loaded preferences");
                prefs.values = values;
            }
            Err(err) => {
                warn!(path = %path.display(), "Invalid preference JSON; using defaults: {err}");
                prefs.load_error = Some(err.to_string());
            }
        }
        prefs
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Why the backing file could not be used, if it could not.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.values.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(%key, "Ignoring preference with unexpected shape: {err}");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> serde_json::Result<()> {
        let value = serde_json::to_value(value)?;
        if self.values.get(key) != Some(&value) {
            self.values.insert(key.to_string(), value);
            self.dirty = true;
        }
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the store next to its target and renames it into place.
    /// In-memory stores have no path and are never written.
    pub fn save(&mut self) -> io::Result<()> {
        if self.path.as_os_str().is_empty() {
            self.dirty = false;
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.values).map_err(io::Error::other)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, contents)?;
        fs::rename(&tmp_path, &self.path)?;
        self.dirty = false;
        self.load_error = None;
        debug!(path = %self.path.display(), "Saved preferences");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_file(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("bookmate_test_{name}_{nanos}.json"))
    }

    #[test]
    fn missing_file_starts_empty_without_error() {
        let prefs = Preferences::load(&unique_temp_file("missing"));
        assert!(prefs.load_error().is_none());
        assert_eq!(prefs.get::<serde_json::Value>("anything"), None);
    }

    #[test]
    fn corrupt_file_falls_back_and_records_error() {
        let path = unique_temp_file("corrupt");
        fs::write(&path, "{ not json").expect("write corrupt prefs");

        let prefs = Preferences::load(&path);
        assert!(prefs.load_error().is_some());
        assert_eq!(prefs.path(), path.as_path());
        assert_eq!(prefs.get::<serde_json::Value>("login_data_2_0"), None);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn values_survive_save_and_reload() {
        let path = unique_temp_file("roundtrip");
        let mut prefs = Preferences::load(&path);
        prefs.set("answer", &42u32).expect("set answer");
        assert!(prefs.is_dirty());
        prefs.save().expect("save prefs");
        assert!(!prefs.is_dirty());

        let reloaded = Preferences::load(&path);
        assert_eq!(reloaded.get::<u32>("answer"), Some(42));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn mismatched_shape_reads_as_none() {
        let mut prefs = Preferences::in_memory();
        prefs.set("answer", &"forty-two").expect("set string");
        assert_eq!(prefs.get::<u32>("answer"), None);
        assert_eq!(prefs.get::<String>("answer").as_deref(), Some("forty-two"));
    }

    #[test]
    fn setting_same_value_does_not_mark_dirty() {
        let mut prefs = Preferences::in_memory();
        prefs.set("flag", &true).expect("set flag");
        prefs.save().expect("in-memory save is a no-op");
        prefs.set("flag", &true).expect("set flag again");
        assert!(!prefs.is_dirty());
        prefs.set("flag", &false).expect("change flag");
        assert!(prefs.is_dirty());
    }
}
