//! In-memory, map-based leaf store.

use std::collections::HashMap;
use std::hash::Hash;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Registry, RegistryResult};

/// Registry backed by a `HashMap` behind an async read/write lock.
#[derive(Debug)]
pub struct MemoryRegistry<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> MemoryRegistry<K, V> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry pre-populated with `entries`.
    pub fn with_entries(entries: HashMap<K, V>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }
}

impl<K, V> Default for MemoryRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Registry<K, V> for MemoryRegistry<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn register(&self, key: K, value: V) -> RegistryResult<Option<V>> {
        Ok(self.entries.write().await.insert(key, value))
    }

    async fn deregister(&self, key: &K) -> RegistryResult<Option<V>> {
        Ok(self.entries.write().await.remove(key))
    }

    async fn lookup(&self, key: &K) -> RegistryResult<Option<V>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn list(&self) -> RegistryResult<Vec<(K, V)>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
