//! Short-name registry for polymorphic values written as YAML tags.
//!
//! ```yaml
//! opener: !bundle
//!   root: /opt/scripter/bundle
//! ```
//!
//! Each tag maps to a factory that builds the concrete value from the tagged
//! payload. Tags are registered once at startup; duplicates are rejected.

use std::collections::BTreeMap;

use crate::error::CoreError;

type Factory<T> = Box<dyn Fn(serde_yaml::Value) -> Result<T, CoreError> + Send + Sync>;

pub struct TagRegistry<T> {
    /// What the tags stand for, used in error messages.
    kind: &'static str,
    factories: BTreeMap<String, Factory<T>>,
}

impl<T> TagRegistry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            factories: BTreeMap::new(),
        }
    }

    /// Register `factory` under `tag` (with or without the leading `!`).
    pub fn register<F>(&mut self, tag: &str, factory: F) -> Result<(), CoreError>
    where
        F: Fn(serde_yaml::Value) -> Result<T, CoreError> + Send + Sync + 'static,
    {
        let tag = tag.trim().trim_start_matches('!');
        if tag.is_empty() {
            return Err(CoreError::Validation(format!(
                "{} tag cannot be blank",
                self.kind
            )));
        }
        if self.factories.contains_key(tag) {
            return Err(CoreError::Conflict(format!(
                "Duplicate {} tag: !{tag}",
                self.kind
            )));
        }
        self.factories.insert(tag.to_string(), Box::new(factory));
        Ok(())
    }

    /// Registered tags, sorted, without the leading `!`.
    pub fn tags(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build a value from an already parsed, tagged YAML node.
    pub fn resolve(&self, value: serde_yaml::Value) -> Result<T, CoreError> {
        let serde_yaml::Value::Tagged(tagged) = value else {
            return Err(CoreError::Validation(format!(
                "Expected a tagged {} (one of {})",
                self.kind,
                self.tag_list()
            )));
        };

        let tag = tagged.tag.to_string();
        let name = tag.trim_start_matches('!');
        let factory = self.factories.get(name).ok_or_else(|| {
            CoreError::Validation(format!(
                "Unknown {} tag '!{name}' (expected one of {})",
                self.kind,
                self.tag_list()
            ))
        })?;
        factory(tagged.value)
    }

    /// Parse `text` and build a value from its tagged root node.
    pub fn load(&self, text: &str) -> Result<T, CoreError> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| CoreError::Serialization(e.to_string()))?;
        self.resolve(value)
    }

    fn tag_list(&self) -> String {
        self.factories
            .keys()
            .map(|tag| format!("!{tag}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
