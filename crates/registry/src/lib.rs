//! Layered key/value registry.
//!
//! A [`Registry`] is a small key/value contract whose mutating operations
//! return the *previous* value. Implementations compose by decoration:
//!
//! ```text
//! CachingRegistry            full in-memory mirror, write-through
//! └── ConvertingRegistry     maps public key/value shapes to the leaf's shapes
//!     └── FileRegistry       one file per key under a directory
//! ```
//!
//! [`MemoryRegistry`] is the in-memory leaf used by tests and by embedders
//! that do not need persistence.

pub mod caching;
pub mod converting;
pub mod error;
pub mod file;
pub mod memory;

use async_trait::async_trait;

pub use caching::CachingRegistry;
pub use converting::{Converter, ConvertingRegistry, SuffixConverter};
pub use error::RegistryError;
pub use file::{FileRegistry, DEFAULT_FILENAME_PATTERN};
pub use memory::MemoryRegistry;

/// Convenience alias for registry results.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Key/value store whose mutations report the value they displaced.
///
/// `register` and `deregister` are idempotent from the caller's point of
/// view: repeating them leaves the same final state. `list` yields entries
/// in no guaranteed order.
#[async_trait]
pub trait Registry<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Store `value` under `key`, returning the value previously stored there.
    async fn register(&self, key: K, value: V) -> RegistryResult<Option<V>>;

    /// Remove the value stored under `key`, returning it if one existed.
    async fn deregister(&self, key: &K) -> RegistryResult<Option<V>>;

    /// Retrieve the value stored under `key`.
    async fn lookup(&self, key: &K) -> RegistryResult<Option<V>>;

    /// Retrieve every key/value pair.
    async fn list(&self) -> RegistryResult<Vec<(K, V)>>;

    /// Store `value` under `key` without materializing the previous value.
    ///
    /// Layers that convert values on the way out override this so callers
    /// that already know the previous value skip the reverse conversion.
    async fn store(&self, key: K, value: V) -> RegistryResult<()> {
        self.register(key, value).await.map(|_| ())
    }

    /// Remove `key` without materializing the removed value.
    async fn discard(&self, key: &K) -> RegistryResult<()> {
        self.deregister(key).await.map(|_| ())
    }
}
