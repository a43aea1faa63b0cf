use crate::database::Database;
use crate::login_data::LoginData;
use crate::meta::{DatabaseMeta, SavedDatabaseEntry};
use crate::preferences::Preferences;
use crate::provider::ProviderRegistry;
use crate::tracker::{DatabaseTracker, SAVED_DATABASES_KEY};
use std::io;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Process-wide state handed to the launcher and the shell.
///
/// Built once at startup and persisted by its owner at shutdown.
pub struct AppContext {
    registry: ProviderRegistry,
    tracker: DatabaseTracker,
    login_data: Mutex<LoginData>,
    preferences: Mutex<Preferences>,
}

impl AppContext {
    pub fn new(registry: ProviderRegistry, preferences: Preferences) -> Self {
        Self {
            registry,
            tracker: DatabaseTracker::new(),
            login_data: Mutex::new(LoginData::new()),
            preferences: Mutex::new(preferences),
        }
    }

    /// Restores the tracker and login data from `preferences`.
    pub fn load(registry: ProviderRegistry, preferences: Preferences) -> Self {
        let entries = preferences
            .get::<Vec<SavedDatabaseEntry>>(SAVED_DATABASES_KEY)
            .unwrap_or_default();
        let tracker = DatabaseTracker::restore(&entries, &registry);
        let login_data = LoginData::load(&preferences, &registry);
        for meta in login_data.saved_databases() {
            tracker.add_database(meta);
        }
        info!(
            saved = tracker.saved_databases().len(),
            auto_login = login_data.is_auto_login(),
            "Restored application context"
        );
        Self {
            registry,
            tracker,
            login_data: Mutex::new(login_data),
            preferences: Mutex::new(preferences),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &DatabaseTracker {
        &self.tracker
    }

    pub fn login_data(&self) -> MutexGuard<'_, LoginData> {
        self.login_data.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn preferences(&self) -> MutexGuard<'_, Preferences> {
        self.preferences.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes tracker and login data back into the preference store and saves it.
    pub fn persist(&self) -> io::Result<()> {
        let login_data = self.login_data().clone();
        let entries = self.tracker.entries();
        let mut preferences = self.preferences();
        preferences
            .set(SAVED_DATABASES_KEY, &entries)
            .map_err(io::Error::other)?;
        login_data.store(&mut preferences).map_err(io::Error::other)?;
        if preferences.is_dirty() {
            preferences.save()?;
        }
        Ok(())
    }

    /// Drops `meta` from both the tracker and the login screen's saved list.
    /// Returns whether either of them knew it.
    pub fn forget_database(&self, meta: &DatabaseMeta) -> bool {
        let untracked = self.tracker.remove_database(meta);
        let forgotten = self.login_data().forget(meta);
        if untracked || forgotten {
            info!(url = %meta.url(), "Forgot database");
        }
        untracked || forgotten
    }

    pub fn close_database(&self, database: &dyn Database) {
        if let Err(err) = database.close() {
            warn!(url = %database.meta().url(), "Failed to close database: {err}");
        }
        self.tracker.on_closing(database.meta());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::FakeProvider;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_file(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("bookmate_test_{name}_{nanos}.json"))
    }

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FakeProvider::new("fake", true)));
        registry
    }

    #[test]
    fn persist_then_load_restores_tracker_and_login_data() {
        let path = unique_temp_file("context");
        let context = AppContext::load(registry(), Preferences::load(&path));
        let a = DatabaseMeta::new("/tmp/a.json", "a", "fake", []);
        let b = DatabaseMeta::new("/tmp/b.json", "b", "fake", []);
        context.tracker().add_database(&a);
        {
            let mut login = context.login_data();
            login.remember(&b);
            login.set_selected_database(Some(&b)).expect("select b");
        }
        context.persist().expect("persist context");

        let restored = AppContext::load(registry(), Preferences::load(&path));
        assert_eq!(restored.tracker().saved_databases(), vec![a, b.clone()]);
        assert_eq!(restored.login_data().selected_database(), Some(&b));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn forgotten_database_stays_gone_after_reload() {
        let path = unique_temp_file("context_forget");
        let context = AppContext::load(registry(), Preferences::load(&path));
        let a = DatabaseMeta::new("/tmp/a.json", "a", "fake", []);
        let b = DatabaseMeta::new("/tmp/b.json", "b", "fake", []);
        for meta in [&a, &b] {
            context.tracker().add_database(meta);
            context.login_data().remember(meta);
        }
        context
            .login_data()
            .set_selected_database(Some(&b))
            .expect("select b");
        context.persist().expect("first persist");

        assert!(context.forget_database(&a));
        assert!(!context.forget_database(&a));
        context.persist().expect("second persist");

        let restored = AppContext::load(registry(), Preferences::load(&path));
        assert_eq!(restored.tracker().saved_databases(), vec![b.clone()]);
        assert_eq!(restored.login_data().saved_databases(), &[b.clone()]);
        assert_eq!(restored.login_data().selected_database(), Some(&b));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn close_database_marks_it_unused() {
        let context = AppContext::new(registry(), Preferences::in_memory());
        let provider = context.registry().get("fake").expect("fake provider");
        let meta = provider.meta_for("/tmp/c.json").expect("meta");
        let db = provider
            .open(&meta, &Default::default(), Default::default())
            .expect("open fake db");
        context.tracker().on_using(&meta);

        context.close_database(db.as_ref());

        assert!(db.is_closed());
        assert!(!context.tracker().is_database_used(&meta));
    }
}
