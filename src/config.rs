//! Configuration loading for the bookmate shell.
//!
//! Settings live in `conf/config.toml` unless `BOOKMATE_CONFIG_PATH` points
//! elsewhere. Missing or invalid entries fall back to defaults so the shell can
//! always start.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const CONFIG_PATH_ENV: &str = "BOOKMATE_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "conf/config.toml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    /// JSON file backing the preference store.
    #[serde(default = "default_preferences_path")]
    pub preferences_path: PathBuf,
    /// Provider used for arguments without a `provider:` prefix.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default)]
    pub create_missing_databases: bool,
    /// Save preferences after every command instead of only at exit.
    #[serde(default = "default_auto_persist")]
    pub auto_persist: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            log_level: default_log_level(),
            preferences_path: default_preferences_path(),
            default_provider: default_provider(),
            create_missing_databases: false,
            auto_persist: default_auto_persist(),
        }
    }
}

/// Supported logging verbosity levels.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from the given path, falling back to defaults on error.
pub fn load_config(path: &Path) -> AppConfig {
    let contents = match fs::read_to_string(path) {
        Ok(data) => {
            info!(path = %path.display(), "Loaded base config");
            data
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                "Falling back to default config: {err}"
            );
            return AppConfig::default();
        }
    };

    match toml::from_str::<AppConfig>(&contents) {
        Ok(cfg) => {
            debug!(?cfg, "Parsed configuration from disk");
            cfg
        }
        Err(err) => {
            warn!(path = %path.display(), "Invalid config TOML: {err}");
            AppConfig::default()
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_preferences_path() -> PathBuf {
    PathBuf::from(".cache/bookmate/preferences.json")
}

fn default_provider() -> String {
    bookmate_core::LocalFileProvider::ID.to_string()
}

fn default_auto_persist() -> bool {
    true
}
