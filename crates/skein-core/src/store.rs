use crate::error::{CoreError, StorageFailure};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

/// Durable key-value persistence gateway.
///
/// The storage layer is the single source of truth for conversation and
/// message state; everything in memory is a projection rebuilt from it.
/// Writes are per-key upserts assumed atomic by the implementation.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), CoreError>;
    fn delete(&self, key: &str) -> Result<(), CoreError>;
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, CoreError> {
        self.entries
            .lock()
            .map_err(|_| StorageFailure::Underlying("store mutex poisoned".to_string()).into())
    }
}

impl StateStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), CoreError> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CoreError> {
        Ok(self
            .lock()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Singleton flags and checkpoints stored as JSON values.
#[derive(Clone)]
pub struct MetadataRepository {
    store: Arc<dyn StateStore>,
}

impl MetadataRepository {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CoreError> {
        match self.store.get(&Self::key(key))? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageFailure::Underlying(e.to_string()).into()),
        }
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| StorageFailure::Underlying(e.to_string()))?;
        self.store.put(&Self::key(key), &bytes)
    }

    pub fn delete(&self, key: &str) -> Result<(), CoreError> {
        self.store.delete(&Self::key(key))
    }

    fn key(key: &str) -> String {
        format!("meta:{}", key)
    }
}
