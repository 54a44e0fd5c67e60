use super::ObjectStore;
use crate::error::{GranaryError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// In-memory object store for development/testing
pub struct InMemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| GranaryError::Storage(format!("object not found: {}", key)))
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        objects.insert(key.to_string(), bytes.to_vec());
        debug!("Stored object {} ({} bytes)", key, bytes.len());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let objects = self.objects.lock().unwrap();
        Ok(objects.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self.objects.lock().unwrap();
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
