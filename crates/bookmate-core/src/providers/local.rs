//! JSON document file databases.
//!
//! One file holds every record of a library. While a database is open for
//! writing, the process holds an exclusive OS lock on a sibling `.lock` file,
//! so a second writer gets `Locked` instead of silently clobbering the file.
//! The OS drops the lock when the holder exits, crashed or not; the file
//! itself is left in place and only records the last holder's pid.
//! A password, when set, is stored as a bcrypt hash in the file header.

use crate::database::{ChangeEvent, Database, Record, RecordId};
use crate::error::DatabaseError;
use crate::listeners::{Listener, ListenerId, ListenerSet};
use crate::meta::{DatabaseMeta, MetaAction};
use crate::provider::{Credentials, DatabaseProvider, LoginField, OpenOptions};
use bcrypt::{DEFAULT_COST, hash, verify};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const STORE_VERSION: u32 = 1;
const USERNAME_FIELD: &str = "username";
const PASSWORD_FIELD: &str = "password";
const HASH_COST: u32 = if cfg!(test) { 4 } else { DEFAULT_COST };

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreSecurity {
    #[serde(default)]
    username: Option<String>,
    password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    security: Option<StoreSecurity>,
    #[serde(default = "first_record_id")]
    next_id: RecordId,
    #[serde(default)]
    records: Vec<Record>,
}

fn first_record_id() -> RecordId {
    1
}

impl StoreFile {
    fn empty(security: Option<StoreSecurity>) -> Self {
        Self {
            version: STORE_VERSION,
            security,
            next_id: first_record_id(),
            records: Vec::new(),
        }
    }
}

fn non_empty<'a>(credentials: &'a Credentials, field: &str) -> Option<&'a str> {
    credentials
        .get(field)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

fn lock_path_for(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

fn write_atomically(path: &Path, store: &StoreFile) -> Result<(), DatabaseError> {
    let contents = serde_json::to_string_pretty(store).map_err(io::Error::other)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Provider for local library files.
///
/// The open variant can be used without credentials and optionally protects
/// new files with a password. The secured variant always asks for a username
/// and password and writes them into newly created files.
pub struct LocalFileProvider {
    id: &'static str,
    name: &'static str,
    secured: bool,
}

impl LocalFileProvider {
    pub const ID: &'static str = "bookmate.local";
    pub const SECURE_ID: &'static str = "bookmate.secure";

    pub fn open_access() -> Self {
        Self {
            id: Self::ID,
            name: "Local library",
            secured: false,
        }
    }

    pub fn secured() -> Self {
        Self {
            id: Self::SECURE_ID,
            name: "Protected local library",
            secured: true,
        }
    }

    fn path_of(meta: &DatabaseMeta) -> PathBuf {
        PathBuf::from(meta.url())
    }

    fn new_security(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<StoreSecurity>, DatabaseError> {
        let username = non_empty(credentials, USERNAME_FIELD).map(str::to_string);
        let password = non_empty(credentials, PASSWORD_FIELD);
        if self.secured {
            if username.is_none() {
                return Err(DatabaseError::MissingCredentials(USERNAME_FIELD.to_string()));
            }
            if password.is_none() {
                return Err(DatabaseError::MissingCredentials(PASSWORD_FIELD.to_string()));
            }
        }
        let Some(password) = password else {
            return Ok(None);
        };
        let password_hash = hash(password, HASH_COST)
            .map_err(|err| DatabaseError::Corrupt(format!("password hash: {err}")))?;
        Ok(Some(StoreSecurity {
            username,
            password_hash,
        }))
    }

    fn verify(security: &StoreSecurity, credentials: &Credentials) -> Result<(), DatabaseError> {
        let password = non_empty(credentials, PASSWORD_FIELD)
            .ok_or_else(|| DatabaseError::MissingCredentials(PASSWORD_FIELD.to_string()))?;
        if let Some(expected) = &security.username {
            if non_empty(credentials, USERNAME_FIELD) != Some(expected.as_str()) {
                return Err(DatabaseError::InvalidCredentials);
            }
        }
        let matches = verify(password, &security.password_hash)
            .map_err(|err| DatabaseError::Corrupt(format!("stored password hash: {err}")))?;
        if !matches {
            return Err(DatabaseError::InvalidCredentials);
        }
        Ok(())
    }

    /// Takes the exclusive lock for `path`. The returned handle holds it
    /// until dropped.
    fn acquire_lock(path: &Path) -> Result<File, DatabaseError> {
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path_for(path))?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(DatabaseError::Locked(path.to_path_buf()));
            }
            Err(TryLockError::Error(err)) => return Err(err.into()),
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(file)
    }

    fn read_store(path: &Path) -> Result<StoreFile, DatabaseError> {
        let contents = fs::read_to_string(path)?;
        let store: StoreFile = serde_json::from_str(&contents)
            .map_err(|err| DatabaseError::Corrupt(format!("{}: {err}", path.display())))?;
        if store.version > STORE_VERSION {
            return Err(DatabaseError::Corrupt(format!(
                "{}: unsupported store version {}",
                path.display(),
                store.version
            )));
        }
        Ok(store)
    }

    fn load_or_create(
        &self,
        path: &Path,
        credentials: &Credentials,
        options: OpenOptions,
    ) -> Result<StoreFile, DatabaseError> {
        if path.exists() {
            let store = Self::read_store(path)?;
            if let Some(security) = &store.security {
                Self::verify(security, credentials)?;
            }
            return Ok(store);
        }
        if !options.create_if_missing || options.read_only {
            return Err(DatabaseError::NotFound(path.to_path_buf()));
        }
        let store = StoreFile::empty(self.new_security(credentials)?);
        write_atomically(path, &store)?;
        info!(path = %path.display(), secured = store.security.is_some(), "Created library file");
        Ok(store)
    }
}

impl DatabaseProvider for LocalFileProvider {
    fn id(&self) -> &str {
        self.id
    }

    fn name(&self) -> &str {
        self.name
    }

    fn login_fields(&self) -> Vec<LoginField> {
        let mut fields = Vec::new();
        if self.secured {
            fields.push(LoginField::new(USERNAME_FIELD, "login.field.username", false));
        }
        fields.push(LoginField::new(PASSWORD_FIELD, "login.field.password", true));
        fields
    }

    fn supports_anonymous(&self) -> bool {
        !self.secured
    }

    fn meta_for(&self, url: &str) -> Result<DatabaseMeta, DatabaseError> {
        let trimmed = url.trim();
        let path = trimmed.strip_prefix("file://").unwrap_or(trimmed);
        if path.is_empty() {
            return Err(DatabaseError::UnsupportedUrl(url.to_string()));
        }
        let path = PathBuf::from(path);
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| DatabaseError::UnsupportedUrl(url.to_string()))?
            .to_string();
        Ok(DatabaseMeta::new(
            path.to_string_lossy(),
            name,
            self.id,
            [
                MetaAction::CheckExists,
                MetaAction::GetSize,
                MetaAction::OpenExternally,
            ],
        ))
    }

    fn open(
        &self,
        meta: &DatabaseMeta,
        credentials: &Credentials,
        options: OpenOptions,
    ) -> Result<Arc<dyn Database>, DatabaseError> {
        let path = Self::path_of(meta);
        if !path.exists() {
            if !options.create_if_missing || options.read_only {
                return Err(DatabaseError::NotFound(path));
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }
        let lock = if options.read_only {
            None
        } else {
            Some(Self::acquire_lock(&path)?)
        };
        let writable = lock.is_some();
        let store = self.load_or_create(&path, credentials, options)?;
        debug!(
            path = %path.display(),
            records = store.records.len(),
            read_only = options.read_only,
            "Opened library file"
        );
        Ok(Arc::new(LocalDatabase {
            meta: meta.clone(),
            path,
            writable,
            lock: Mutex::new(lock),
            store: Mutex::new(store),
            closed: AtomicBool::new(false),
            listeners: ListenerSet::new(),
        }))
    }

    fn exists(&self, meta: &DatabaseMeta) -> bool {
        Self::path_of(meta).is_file()
    }

    fn size(&self, meta: &DatabaseMeta) -> Option<u64> {
        fs::metadata(Self::path_of(meta)).ok().map(|m| m.len())
    }

    fn open_externally(&self, meta: &DatabaseMeta) -> Result<(), DatabaseError> {
        let path = Self::path_of(meta);
        let folder = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let opener = if cfg!(target_os = "macos") {
            "open"
        } else if cfg!(target_os = "windows") {
            "explorer"
        } else {
            "xdg-open"
        };
        Command::new(opener).arg(folder).spawn()?;
        Ok(())
    }
}

pub struct LocalDatabase {
    meta: DatabaseMeta,
    path: PathBuf,
    writable: bool,
    lock: Mutex<Option<File>>,
    store: Mutex<StoreFile>,
    closed: AtomicBool,
    listeners: ListenerSet<ChangeEvent>,
}

impl LocalDatabase {
    /// Applies `change` to the in-memory store and writes the file. The
    /// in-memory copy is rolled back when the write fails.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut StoreFile) -> Result<(T, ChangeEvent), DatabaseError>,
    ) -> Result<T, DatabaseError> {
        if self.is_closed() {
            return Err(DatabaseError::Closed);
        }
        if !self.writable {
            return Err(DatabaseError::ReadOnly);
        }
        let (result, event) = {
            let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            let backup = store.clone();
            let (result, event) = change(&mut store)?;
            if let Err(err) = write_atomically(&self.path, &store) {
                *store = backup;
                return Err(err);
            }
            (result, event)
        };
        self.listeners.notify(&event);
        Ok(result)
    }

}

impl Database for LocalDatabase {
    fn meta(&self) -> &DatabaseMeta {
        &self.meta
    }

    fn insert(&self, mut record: Record) -> Result<RecordId, DatabaseError> {
        self.mutate(|store| {
            record.id = store.next_id;
            store.next_id += 1;
            store.records.push(record.clone());
            Ok((record.id, ChangeEvent::Inserted(record)))
        })
    }

    fn update(&self, record: Record) -> Result<(), DatabaseError> {
        self.mutate(|store| {
            let slot = store
                .records
                .iter_mut()
                .find(|existing| existing.id == record.id)
                .ok_or(DatabaseError::RecordNotFound(record.id))?;
            *slot = record.clone();
            Ok(((), ChangeEvent::Updated(record)))
        })
    }

    fn remove(&self, id: RecordId) -> Result<(), DatabaseError> {
        self.mutate(|store| {
            let idx = store
                .records
                .iter()
                .position(|existing| existing.id == id)
                .ok_or(DatabaseError::RecordNotFound(id))?;
            store.records.remove(idx);
            Ok(((), ChangeEvent::Removed(id)))
        })
    }

    fn records(&self) -> Result<Vec<Record>, DatabaseError> {
        if self.is_closed() {
            return Err(DatabaseError::Closed);
        }
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        Ok(store.records.clone())
    }

    fn close(&self) -> Result<(), DatabaseError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.lock.lock().unwrap_or_else(|e| e.into_inner()).take();
        info!(path = %self.path.display(), "Closed library file");
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
