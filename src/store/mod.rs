use crate::error::CacheError;
use bytes::Bytes;

/// Asynchronous string-keyed storage the cache persists into.
///
/// This is the only shared mutable resource of the crate; every component
/// reads and writes through it and none keeps its own copy of the data.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Get a value by key, `None` if absent
    async fn get_item(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Store a value under key, replacing any previous value
    async fn set_item(&self, key: &str, value: Bytes) -> Result<(), CacheError>;

    /// Remove a value; removing an absent key is not an error
    async fn remove_item(&self, key: &str) -> Result<(), CacheError>;

    /// List every key currently stored
    async fn get_all_keys(&self) -> Result<Vec<String>, CacheError>;

    /// Remove several values at once
    async fn multi_remove(&self, keys: &[String]) -> Result<(), CacheError> {
        for key in keys {
            self.remove_item(key).await?;
        }
        Ok(())
    }
}

pub mod compressed;
pub mod file;
pub mod memory;
