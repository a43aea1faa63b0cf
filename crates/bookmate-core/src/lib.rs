//! Data-source plumbing for the bookmate catalog: provider registry, the
//! saved/used database tracker, persisted login data and the activity
//! launcher that decides what the user sees at startup.

pub mod context;
pub mod database;
pub mod error;
pub mod executor;
pub mod launcher;
pub mod listeners;
pub mod login_data;
pub mod meta;
pub mod preferences;
pub mod provider;
pub mod providers;
pub mod tracker;

pub use context::AppContext;
pub use database::{ChangeEvent, Database, Record, RecordId, RecordKind};
pub use error::{DatabaseError, SelectionError};
pub use executor::{Background, BackgroundError, UiLoop, UiQueue, ui_channel};
pub use launcher::{
    ActivityHandle, ActivityHost, ActivityKind, ActivityLauncher, CredentialRequest,
    LaunchFailure, LaunchMode, LaunchOutcome,
};
pub use listeners::{Listener, ListenerId, ListenerSet};
pub use login_data::LoginData;
pub use meta::{DatabaseMeta, MetaAction, SavedDatabaseEntry};
pub use preferences::Preferences;
pub use provider::{Credentials, DatabaseProvider, LoginField, OpenOptions, ProviderRegistry};
pub use providers::{LocalDatabase, LocalFileProvider, builtin_registry};
pub use tracker::{DatabaseTracker, TrackerEvent};
