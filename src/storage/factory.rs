use crate::config::{StorageBackend, StorageConfig};
use crate::error::{EventingError, Result};
use crate::storage::{EventingStore, InMemoryStore, SledStore};
use std::sync::Arc;

/// Create a store from configuration
pub async fn create_store(config: &StorageConfig) -> Result<Arc<dyn EventingStore>> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage backend");
            Ok(create_in_memory_store())
        }
        StorageBackend::Sled => {
            let path = config.path.as_ref().ok_or_else(|| {
                EventingError::Configuration(
                    "storage.path is required for the sled backend".to_string(),
                )
            })?;
            tracing::info!(path = %path.display(), "Using sled storage backend");
            Ok(Arc::new(SledStore::new(path)?))
        }
    }
}

/// Create an in-memory store (for embedding and testing)
pub fn create_in_memory_store() -> Arc<dyn EventingStore> {
    Arc::new(InMemoryStore::new())
}
