//! Write-through cache mirroring the entire contents of a delegate registry.

use std::collections::HashMap;
use std::hash::Hash;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::{Registry, RegistryResult};

/// Full in-memory mirror of a delegate registry.
///
/// The mirror is populated once from `delegate.list()` when the cache is
/// built. Reads never touch the delegate; writes go to the delegate first and
/// only update the mirror once the delegate accepted them, so a failed write
/// leaves both sides unchanged.
///
/// Registering a value equal to the one already cached is a no-op that
/// returns the value itself, without writing through.
pub struct CachingRegistry<K, V> {
    delegate: Box<dyn Registry<K, V>>,
    entries: RwLock<HashMap<K, V>>,
    /// Serializes writers so the delegate and the mirror change in lockstep.
    writes: Mutex<()>,
}

impl<K, V> CachingRegistry<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Wrap `delegate`, preloading every entry it currently holds.
    pub async fn new(delegate: impl Registry<K, V> + 'static) -> RegistryResult<Self> {
        let entries: HashMap<K, V> = delegate.list().await?.into_iter().collect();
        tracing::debug!(count = entries.len(), "Registry cache preloaded");

        Ok(Self {
            delegate: Box::new(delegate),
            entries: RwLock::new(entries),
            writes: Mutex::new(()),
        })
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl<K, V> Registry<K, V> for CachingRegistry<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    async fn register(&self, key: K, value: V) -> RegistryResult<Option<V>> {
        let _guard = self.writes.lock().await;

        if self.entries.read().await.get(&key) == Some(&value) {
            return Ok(Some(value));
        }

        self.delegate.store(key.clone(), value.clone()).await?;
        Ok(self.entries.write().await.insert(key, value))
    }

    async fn deregister(&self, key: &K) -> RegistryResult<Option<V>> {
        let _guard = self.writes.lock().await;

        self.delegate.discard(key).await?;
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

    async fn store(&self, key: K, value: V) -> RegistryResult<()> {
        self.register(key, value).await.map(|_| ())
    }

    async fn discard(&self, key: &K) -> RegistryResult<()> {
        self.deregister(key).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
