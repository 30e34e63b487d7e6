//! Converter-based view over another registry.
//!
//! [`ConvertingRegistry`] exposes `Registry<K1, V1>` while storing
//! `Registry<K2, V2>` underneath, using one [`Converter`] for keys and one
//! for values. It lets a plain text store back a richer object registry.

use async_trait::async_trait;

use crate::{Registry, RegistryError, RegistryResult};

/// Bidirectional mapping between an exposed type `A` and a stored type `B`.
#[async_trait]
pub trait Converter<A, B>: Send + Sync
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    /// Map an exposed value to its stored form.
    async fn forward(&self, value: &A) -> RegistryResult<B>;

    /// Map a stored value back to its exposed form.
    async fn backward(&self, value: B) -> RegistryResult<A>;

    /// Map a batch of stored values back, preserving input order.
    ///
    /// Converters whose reverse conversions depend on each other override
    /// this to control the order in which the batch is processed.
    async fn backward_all(&self, values: Vec<B>) -> RegistryResult<Vec<A>> {
        let mut converted = Vec::with_capacity(values.len());
        for value in values {
            converted.push(self.backward(value).await?);
        }
        Ok(converted)
    }
}

/// Key converter that appends a fixed suffix on the way in and strips it on
/// the way out (e.g. `greeter` <-> `greeter.yaml`).
#[derive(Debug, Clone)]
pub struct SuffixConverter {
    suffix: String,
}

impl SuffixConverter {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

#[async_trait]
impl Converter<String, String> for SuffixConverter {
    async fn forward(&self, value: &String) -> RegistryResult<String> {
        Ok(format!("{value}{}", self.suffix))
    }

    async fn backward(&self, value: String) -> RegistryResult<String> {
        value
            .strip_suffix(&self.suffix)
            .map(str::to_string)
            .ok_or_else(|| {
                RegistryError::InvalidKey(format!(
                    "'{value}' does not end with '{}'",
                    self.suffix
                ))
            })
    }
}

/// Registry exposing `K1`/`V1` over a delegate storing `K2`/`V2`.
pub struct ConvertingRegistry<K1, V1, K2, V2> {
    delegate: Box<dyn Registry<K2, V2>>,
    keys: Box<dyn Converter<K1, K2>>,
    values: Box<dyn Converter<V1, V2>>,
}

impl<K1, V1, K2, V2> ConvertingRegistry<K1, V1, K2, V2>
where
    K1: Send + Sync + 'static,
    V1: Send + Sync + 'static,
    K2: Send + Sync + 'static,
    V2: Send + Sync + 'static,
{
    pub fn new(
        delegate: impl Registry<K2, V2> + 'static,
        keys: impl Converter<K1, K2> + 'static,
        values: impl Converter<V1, V2> + 'static,
    ) -> Self {
        Self {
            delegate: Box::new(delegate),
            keys: Box::new(keys),
            values: Box::new(values),
        }
    }

    async fn restore(&self, stored: Option<V2>) -> RegistryResult<Option<V1>> {
        match stored {
            Some(value) => Ok(Some(self.values.backward(value).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<K1, V1, K2, V2> Registry<K1, V1> for ConvertingRegistry<K1, V1, K2, V2>
where
    K1: Send + Sync + 'static,
    V1: Send + Sync + 'static,
    K2: Send + Sync + 'static,
    V2: Send + Sync + 'static,
{
    async fn register(&self, key: K1, value: V1) -> RegistryResult<Option<V1>> {
        let key = self.keys.forward(&key).await?;
        let value = self.values.forward(&value).await?;
        let previous = self.delegate.register(key, value).await?;
        self.restore(previous).await
    }

    async fn deregister(&self, key: &K1) -> RegistryResult<Option<V1>> {
        let key = self.keys.forward(key).await?;
        let previous = self.delegate.deregister(&key).await?;
        self.restore(previous).await
    }

    async fn lookup(&self, key: &K1) -> RegistryResult<Option<V1>> {
        let key = self.keys.forward(key).await?;
        let stored = self.delegate.lookup(&key).await?;
        self.restore(stored).await
    }

    async fn list(&self) -> RegistryResult<Vec<(K1, V1)>> {
        let stored = self.delegate.list().await?;

        let mut keys = Vec::with_capacity(stored.len());
        let mut values = Vec::with_capacity(stored.len());
        for (key, value) in stored {
            keys.push(self.keys.backward(key).await?);
            values.push(value);
        }

        let values = self.values.backward_all(values).await?;
        Ok(keys.into_iter().zip(values).collect())
    }

    async fn store(&self, key: K1, value: V1) -> RegistryResult<()> {
        let key = self.keys.forward(&key).await?;
        let value = self.values.forward(&value).await?;
        self.delegate.store(key, value).await
    }

    async fn discard(&self, key: &K1) -> RegistryResult<()> {
        let key = self.keys.forward(key).await?;
        self.delegate.discard(&key).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;

    use super::*;
    use crate::MemoryRegistry;

    /// Stores integers as decimal strings and counts reverse conversions.
    #[derive(Default)]
    struct DecimalConverter {
        backward_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Converter<i64, String> for DecimalConverter {
        async fn forward(&self, value: &i64) -> RegistryResult<String> {
            Ok(value.to_string())
        }

        async fn backward(&self, value: String) -> RegistryResult<i64> {
            self.backward_calls.fetch_add(1, Ordering::SeqCst);
            value.parse().map_err(RegistryError::conversion)
        }
    }

    fn registry() -> (ConvertingRegistry<String, i64, String, String>, Arc<AtomicUsize>) {
        let converter = DecimalConverter::default();
        let calls = Arc::clone(&converter.backward_calls);
        let registry = ConvertingRegistry::new(
            MemoryRegistry::<String, String>::new(),
            SuffixConverter::new(".num"),
            converter,
        );
        (registry, calls)
    }

    #[tokio::test]
    async fn suffix_converter_round_trips() {
        let converter = SuffixConverter::new(".yaml");
        let stored = converter.forward(&"greeter".to_string()).await.expect("forward");
        assert_eq!(stored, "greeter.yaml");
        assert_eq!(converter.backward(stored).await.expect("backward"), "greeter");
    }

    #[tokio::test]
    async fn suffix_converter_rejects_foreign_keys() {
        let converter = SuffixConverter::new(".yaml");
        let result = converter.backward("greeter.txt".to_string()).await;
        assert_matches!(result, Err(RegistryError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn register_converts_previous_value_back() {
        let (registry, _) = registry();
        assert_eq!(
            registry.register("a".to_string(), 1).await.expect("register"),
            None
        );
        assert_eq!(
            registry.register("a".to_string(), 2).await.expect("register"),
            Some(1)
        );
        assert_eq!(
            registry.lookup(&"a".to_string()).await.expect("lookup"),
            Some(2)
        );
    }

    #[tokio::test]
    async fn list_converts_keys_and_values() {
        let (registry, _) = registry();
        registry.register("a".to_string(), 1).await.expect("register");
        registry.register("b".to_string(), 2).await.expect("register");

        let mut entries = registry.list().await.expect("list");
        entries.sort();
        assert_eq!(entries, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[tokio::test]
    async fn store_and_discard_never_convert_backward() {
        let (registry, calls) = registry();
        registry.store("a".to_string(), 1).await.expect("store");
        registry.store("a".to_string(), 2).await.expect("store");
        registry.discard(&"a".to_string()).await.expect("discard");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn conversion_failures_surface_as_errors() {
        let leaf = MemoryRegistry::<String, String>::new();
        leaf.register("bad.num".to_string(), "not a number".to_string())
            .await
            .expect("register");
        let registry = ConvertingRegistry::new(
            leaf,
            SuffixConverter::new(".num"),
            DecimalConverter::default(),
        );
        let result: RegistryResult<Option<i64>> = registry.lookup(&"bad".to_string()).await;
        assert_matches!(result, Err(RegistryError::Conversion(_)));
    }
}
