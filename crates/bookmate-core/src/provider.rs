use crate::database::Database;
use crate::error::DatabaseError;
use crate::meta::{DatabaseMeta, SavedDatabaseEntry};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Field id -> value, as typed into a login form.
pub type Credentials = BTreeMap<String, String>;

/// One input a provider needs before it can open a data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginField {
    pub id: String,
    pub label_key: String,
    pub secret: bool,
}

impl LoginField {
    pub fn new(id: &str, label_key: &str, secret: bool) -> Self {
        Self {
            id: id.to_string(),
            label_key: label_key.to_string(),
            secret,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub create_if_missing: bool,
    pub read_only: bool,
}

pub trait DatabaseProvider: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn login_fields(&self) -> Vec<LoginField>;

    /// Whether `open` can succeed with an empty credential map.
    fn supports_anonymous(&self) -> bool;

    fn meta_for(&self, url: &str) -> Result<DatabaseMeta, DatabaseError>;

    fn open(
        &self,
        meta: &DatabaseMeta,
        credentials: &Credentials,
        options: OpenOptions,
    ) -> Result<Arc<dyn Database>, DatabaseError>;

    fn exists(&self, meta: &DatabaseMeta) -> bool;

    fn size(&self, _meta: &DatabaseMeta) -> Option<u64> {
        None
    }

    fn open_externally(&self, _meta: &DatabaseMeta) -> Result<(), DatabaseError> {
        Err(DatabaseError::Unsupported(self.id().to_string()))
    }
}

/// Providers known to this process, in registration order.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn DatabaseProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider, replacing any earlier one with the same id.
    pub fn register(&mut self, provider: Arc<dyn DatabaseProvider>) {
        self.providers.retain(|existing| existing.id() != provider.id());
        self.providers.push(provider);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn DatabaseProvider>> {
        self.providers
            .iter()
            .find(|provider| provider.id() == id)
            .cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn provider_for(
        &self,
        meta: &DatabaseMeta,
    ) -> Result<Arc<dyn DatabaseProvider>, DatabaseError> {
        self.get(meta.provider_id())
            .ok_or_else(|| DatabaseError::UnknownProvider(meta.provider_id().to_string()))
    }

    pub fn meta_for(&self, provider_id: &str, url: &str) -> Result<DatabaseMeta, DatabaseError> {
        let provider = self
            .get(provider_id)
            .ok_or_else(|| DatabaseError::UnknownProvider(provider_id.to_string()))?;
        provider.meta_for(url)
    }

    /// Turns a persisted entry back into a meta. Entries whose provider is not
    /// registered are skipped with a warning instead of failing the caller.
    pub fn resolve(&self, entry: &SavedDatabaseEntry) -> Option<DatabaseMeta> {
        match self.meta_for(&entry.provider, &entry.url) {
            Ok(meta) => Some(meta),
            Err(err) => {
                warn!(
                    provider = %entry.provider,
                    url = %entry.url,
                    "Skipping saved database: {err}"
                );
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::database::{ChangeEvent, Record, RecordId};
    use crate::listeners::{Listener, ListenerId, ListenerSet};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory provider whose open results are scripted per call.
    pub struct FakeProvider {
        id: String,
        anonymous: bool,
        scripted: Mutex<VecDeque<Result<(), DatabaseError>>>,
        pub open_calls: AtomicUsize,
        pub seen_credentials: Mutex<Vec<Credentials>>,
    }

    impl FakeProvider {
        pub fn new(id: &str, anonymous: bool) -> Self {
            Self {
                id: id.to_string(),
                anonymous,
                scripted: Mutex::new(VecDeque::new()),
                open_calls: AtomicUsize::new(0),
                seen_credentials: Mutex::new(Vec::new()),
            }
        }

        pub fn fail_next(&self, err: DatabaseError) {
            self.scripted.lock().expect("script lock").push_back(Err(err));
        }

        pub fn calls(&self) -> usize {
            self.open_calls.load(Ordering::SeqCst)
        }
    }

    impl DatabaseProvider for FakeProvider {
        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> &str {
            "Fake"
        }

        fn login_fields(&self) -> Vec<LoginField> {
            vec![LoginField::new("password", "login.field.password", true)]
        }

        fn supports_anonymous(&self) -> bool {
            self.anonymous
        }

        fn meta_for(&self, url: &str) -> Result<DatabaseMeta, DatabaseError> {
            if url.trim().is_empty() {
                return Err(DatabaseError::UnsupportedUrl(url.to_string()));
            }
            let name = url.rsplit('/').next().unwrap_or(url).to_string();
            Ok(DatabaseMeta::new(url, name, self.id.clone(), []))
        }

        fn open(
            &self,
            meta: &DatabaseMeta,
            credentials: &Credentials,
            _options: OpenOptions,
        ) -> Result<Arc<dyn Database>, DatabaseError> {
            self.open_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_credentials
                .lock()
                .expect("credentials lock")
                .push(credentials.clone());
            let scripted = self.scripted.lock().expect("script lock").pop_front();
            if let Some(Err(err)) = scripted {
                return Err(err);
            }
            Ok(Arc::new(MemoryDatabase::new(meta.clone())))
        }

        fn exists(&self, _meta: &DatabaseMeta) -> bool {
            true
        }
    }

    pub struct MemoryDatabase {
        meta: DatabaseMeta,
        records: Mutex<Vec<Record>>,
        closed: AtomicBool,
        listeners: ListenerSet<ChangeEvent>,
    }

    impl MemoryDatabase {
        pub fn new(meta: DatabaseMeta) -> Self {
            Self {
                meta,
                records: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                listeners: ListenerSet::new(),
            }
        }
    }

    impl Database for MemoryDatabase {
        fn meta(&self) -> &DatabaseMeta {
            &self.meta
        }

        fn insert(&self, mut record: Record) -> Result<RecordId, DatabaseError> {
            let mut records = self.records.lock().expect("records lock");
            record.id = records.len() as RecordId + 1;
            records.push(record.clone());
            drop(records);
            let id = record.id;
            self.listeners.notify(&ChangeEvent::Inserted(record));
            Ok(id)
        }

        fn update(&self, record: Record) -> Result<(), DatabaseError> {
            let mut records = self.records.lock().expect("records lock");
            let slot = records
                .iter_mut()
                .find(|r| r.id == record.id)
                .ok_or(DatabaseError::RecordNotFound(record.id))?;
            *slot = record;
            Ok(())
        }

        fn remove(&self, id: RecordId) -> Result<(), DatabaseError> {
            self.records.lock().expect("records lock").retain(|r| r.id != id);
            Ok(())
        }

        fn records(&self) -> Result<Vec<Record>, DatabaseError> {
            Ok(self.records.lock().expect("records lock").clone())
        }

        fn close(&self) -> Result<(), DatabaseError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn add_listener(&self, listener: Listener<ChangeEvent>) -> ListenerId {
            self.listeners.add(listener)
        }

        fn remove_listener(&self, id: ListenerId) -> bool {
            self.listeners.remove(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeProvider;
    use super::*;

    #[test]
    fn resolve_skips_unknown_providers() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FakeProvider::new("fake", true)));

        let known = SavedDatabaseEntry {
            provider: "fake".to_string(),
            url: "/tmp/one.json".to_string(),
        };
        let unknown = SavedDatabaseEntry {
            provider: "gone".to_string(),
            url: "/tmp/two.json".to_string(),
        };

        assert_eq!(
            registry.resolve(&known).map(|m| m.url().to_string()),
            Some("/tmp/one.json".to_string())
        );
        assert!(registry.resolve(&unknown).is_none());
    }

    #[test]
    fn open_externally_defaults_to_unsupported() {
        let provider = FakeProvider::new("fake", true);
        let meta = provider.meta_for("/tmp/one.json").expect("meta");

        let err = provider
            .open_externally(&meta)
            .expect_err("fake provider has no external viewer");

        assert!(matches!(&err, DatabaseError::Unsupported(id) if id == "fake"));
        assert_eq!(err.message_key(), "database.error.unsupported_action");
    }

    #[test]
    fn register_replaces_provider_with_same_id() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FakeProvider::new("fake", true)));
        registry.register(Arc::new(FakeProvider::new("fake", false)));
        assert_eq!(registry.ids(), vec!["fake".to_string()]);
        let provider = registry.get("fake").expect("provider registered");
        assert!(!provider.supports_anonymous());
    }
}
