//! The opened data-source capability.
//!
//! Concrete storage lives behind [`Database`]; the launcher and shell only see
//! this trait, so providers are free to choose their own backing store.

use crate::error::DatabaseError;
use crate::listeners::{Listener, ListenerId};
use crate::meta::DatabaseMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type RecordId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Book,
    Magazine,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RecordKind::Book => "book",
            RecordKind::Magazine => "magazine",
        };
        write!(f, "{}", label)
    }
}

/// One cataloged item. `id` is assigned by the database on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub id: RecordId,
    pub kind: RecordKind,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new(kind: RecordKind, title: impl Into<String>) -> Self {
        Self {
            id: 0,
            kind,
            title: title.into(),
            authors: Vec::new(),
            fields: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Inserted(Record),
    Updated(Record),
    Removed(RecordId),
}

pub trait Database: Send + Sync {
    fn meta(&self) -> &DatabaseMeta;

    fn insert(&self, record: Record) -> Result<RecordId, DatabaseError>;

    fn update(&self, record: Record) -> Result<(), DatabaseError>;

    fn remove(&self, id: RecordId) -> Result<(), DatabaseError>;

    fn records(&self) -> Result<Vec<Record>, DatabaseError>;

    /// Flushes and releases the data source. Later calls fail with `Closed`.
    fn close(&self) -> Result<(), DatabaseError>;

    fn is_closed(&self) -> bool;

    fn add_listener(&self, listener: Listener<ChangeEvent>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;
}

impl std::fmt::Debug for dyn Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("meta", self.meta())
            .field("closed", &self.is_closed())
            .finish()
    }
}
