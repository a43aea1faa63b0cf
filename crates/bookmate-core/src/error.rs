use std::path::PathBuf;
use thiserror::Error;

/// Reasons a data source could not be constructed or operated on.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("database is locked by another process: {}", .0.display())]
    Locked(PathBuf),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("missing credential field `{0}`")]
    MissingCredentials(String),
    #[error("database file is corrupt: {0}")]
    Corrupt(String),
    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("action not supported by provider {0}")]
    Unsupported(String),
    #[error("database is closed")]
    Closed,
    #[error("database was opened read-only")]
    ReadOnly,
    #[error("record {0} does not exist")]
    RecordNotFound(u64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DatabaseError {
    /// Stable localization key shown to the user instead of the raw error.
    pub fn message_key(&self) -> &'static str {
        match self {
            DatabaseError::NotFound(_) => "database.error.not_found",
            DatabaseError::Locked(_) => "database.error.locked",
            DatabaseError::InvalidCredentials => "login.error.invalid_credentials",
            DatabaseError::MissingCredentials(_) => "login.error.missing_credentials",
            DatabaseError::Corrupt(_) => "database.error.corrupt",
            DatabaseError::UnsupportedUrl(_) => "database.error.unsupported_url",
            DatabaseError::UnknownProvider(_) => "database.error.unknown_provider",
            DatabaseError::Unsupported(_) => "database.error.unsupported_action",
            DatabaseError::Closed => "database.error.closed",
            DatabaseError::ReadOnly => "database.error.read_only",
            DatabaseError::RecordNotFound(_) => "database.error.record_not_found",
            DatabaseError::Io(_) => "database.error.io",
        }
    }

    /// Whether asking the user for (different) credentials can recover.
    pub fn needs_credentials(&self) -> bool {
        matches!(
            self,
            DatabaseError::InvalidCredentials | DatabaseError::MissingCredentials(_)
        )
    }
}

/// Selecting a database that is not part of the saved list.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("database {url} is not in the saved database list")]
pub struct SelectionError {
    pub url: String,
}
