mod local;

pub use local::{LocalDatabase, LocalFileProvider};

use crate::provider::ProviderRegistry;
use std::sync::Arc;

/// Registry with every provider that ships with the application.
pub fn builtin_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(LocalFileProvider::open_access()));
    registry.register(Arc::new(LocalFileProvider::secured()));
    registry
}
