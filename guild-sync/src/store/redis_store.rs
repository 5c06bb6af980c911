use super::KeyValueStore;
use crate::Result;
use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Config, Pool, Runtime};
use std::sync::Arc;

pub struct RedisStore {
    client: Arc<Pool>,
    expiry_seconds: Option<usize>,
}

impl RedisStore {
    pub fn new(client: Arc<Pool>, expiry_seconds: Option<usize>) -> Self {
        Self {
            client,
            expiry_seconds,
        }
    }

    pub fn connect(uri: String, expiry_seconds: Option<usize>) -> Result<Self> {
        let pool = Config::from_url(uri).create_pool(Some(Runtime::Tokio1))?;
        Ok(Self::new(Arc::new(pool), expiry_seconds))
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.client.get().await?;
        let value: Option<String> = conn.get(key).await?;

        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self.client.get().await?;

        match self.expiry_seconds {
            Some(seconds) => conn.set_ex::<_, _, ()>(key, value, seconds).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }

        Ok(())
    }
}
