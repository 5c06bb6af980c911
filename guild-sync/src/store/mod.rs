use crate::Result;
use async_trait::async_trait;

mod memory_store;
pub use memory_store::MemoryStore;

mod redis_store;
pub use redis_store::RedisStore;

/// Whole-value key/value storage shared between the refresh job and membership lookups.
/// A `get` observes either the value before or after a concurrent `set`, never a mix.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
}
