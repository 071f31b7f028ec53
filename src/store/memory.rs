//! In-memory store.

use ahash::AHashMap;
use parking_lot::RwLock;
use serde_json::Value;

use super::Store;
use crate::error::Result;

/// Store kept entirely in memory. Used for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<AHashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, items: Vec<(String, Value)>) -> Result<()> {
        let mut values = self.values.write();
        for (key, value) in items {
            values.insert(key, value);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }
}
