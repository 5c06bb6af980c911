use super::KeyValueStore;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Default)]
pub struct MemoryStore {
    values: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).map(|value| value.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.values.insert(key.to_owned(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set() {
        let store = MemoryStore::new();

        assert_eq!(store.get("members").await.unwrap(), None);

        store.set("members", "[]".to_owned()).await.unwrap();
        assert_eq!(store.get("members").await.unwrap().as_deref(), Some("[]"));

        store.set("members", "[1]".to_owned()).await.unwrap();
        assert_eq!(store.get("members").await.unwrap().as_deref(), Some("[1]"));
        assert_eq!(store.get("other").await.unwrap(), None);
    }
}
