//! Registry of known ("saved") and currently open ("used") data sources.
//!
//! Shared by everything that shows or opens databases. All mutation goes
//! through these methods; observers are called synchronously after the state
//! change, outside the internal lock.

use crate::listeners::{Listener, ListenerId, ListenerSet};
use crate::meta::{DatabaseMeta, SavedDatabaseEntry};
use crate::provider::ProviderRegistry;
use std::sync::Mutex;
use tracing::debug;

pub const SAVED_DATABASES_KEY: &str = "saved_databases_2_0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    Added(DatabaseMeta),
    Removed(DatabaseMeta),
    Opened(DatabaseMeta),
    Closed(DatabaseMeta),
}

#[derive(Default)]
struct TrackerState {
    saved: Vec<DatabaseMeta>,
    used: Vec<DatabaseMeta>,
}

#[derive(Default)]
pub struct DatabaseTracker {
    state: Mutex<TrackerState>,
    observers: ListenerSet<TrackerEvent>,
}

impl DatabaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the saved list from persisted entries, dropping unknown providers.
    pub fn restore(entries: &[SavedDatabaseEntry], registry: &ProviderRegistry) -> Self {
        let tracker = Self::new();
        {
            let mut state = tracker.lock();
            for meta in entries.iter().filter_map(|entry| registry.resolve(entry)) {
                if !state.saved.contains(&meta) {
                    state.saved.push(meta);
                }
            }
        }
        tracker
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn saved_databases(&self) -> Vec<DatabaseMeta> {
        self.lock().saved.clone()
    }

    pub fn used_databases(&self) -> Vec<DatabaseMeta> {
        self.lock().used.clone()
    }

    pub fn entries(&self) -> Vec<SavedDatabaseEntry> {
        self.lock().saved.iter().map(DatabaseMeta::to_entry).collect()
    }

    pub fn is_saved(&self, meta: &DatabaseMeta) -> bool {
        self.lock().saved.contains(meta)
    }

    pub fn is_database_used(&self, meta: &DatabaseMeta) -> bool {
        self.lock().used.contains(meta)
    }

    /// Appends `meta` unless an entry with the same url is already saved.
    /// Returns whether the list changed.
    pub fn add_database(&self, meta: &DatabaseMeta) -> bool {
        let added = {
            let mut state = self.lock();
            if state.saved.contains(meta) {
                false
            } else {
                state.saved.push(meta.clone());
                true
            }
        };
        if added {
            debug!(url = %meta.url(), "Tracking new database");
            self.observers.notify(&TrackerEvent::Added(meta.clone()));
        }
        added
    }

    pub fn remove_database(&self, meta: &DatabaseMeta) -> bool {
        let removed = {
            let mut state = self.lock();
            let before = state.saved.len();
            state.saved.retain(|existing| existing != meta);
            state.saved.len() != before
        };
        if removed {
            debug!(url = %meta.url(), "Stopped tracking database");
            self.observers.notify(&TrackerEvent::Removed(meta.clone()));
        }
        removed
    }

    /// Marks a data source as open. It does not have to be saved.
    pub fn on_using(&self, meta: &DatabaseMeta) {
        let opened = {
            let mut state = self.lock();
            if state.used.contains(meta) {
                false
            } else {
                state.used.push(meta.clone());
                true
            }
        };
        if opened {
            self.observers.notify(&TrackerEvent::Opened(meta.clone()));
        }
    }

    pub fn on_closing(&self, meta: &DatabaseMeta) {
        let closed = {
            let mut state = self.lock();
            let before = state.used.len();
            state.used.retain(|existing| existing != meta);
            state.used.len() != before
        };
        if closed {
            self.observers.notify(&TrackerEvent::Closed(meta.clone()));
        }
    }

    pub fn subscribe(&self, observer: Listener<TrackerEvent>) -> ListenerId {
        self.observers.add(observer)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.observers.remove(id)
    }
}
