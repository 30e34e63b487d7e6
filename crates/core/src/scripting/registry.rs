//! Language name to backend lookup.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CoreError;

use super::backend::ExecutionBackend;
use super::expr::ExprBackend;
use super::python::PythonBackend;
use super::shell::ShellBackend;

/// Settings shared by the built-in subprocess backends.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Wall-clock limit for one subprocess run.
    pub timeout: Duration,
    /// Interpreter used by the python backend.
    pub python_bin: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            python_bin: "python3".to_string(),
        }
    }
}

/// Backends keyed by (lower-cased) language name and alias.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn ExecutionBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only the in-process `expr` backend.
    pub fn with_expr() -> Self {
        let mut registry = Self::new();
        // A fresh registry cannot hold a clashing name.
        let _ = registry.register(Arc::new(ExprBackend::new()));
        registry
    }

    /// Build a registry from built-in backend names (`expr`, `shell`, `python`).
    pub fn from_names<S: AsRef<str>>(
        names: &[S],
        settings: &BackendSettings,
    ) -> Result<Self, CoreError> {
        let mut registry = Self::new();
        for name in names {
            let backend: Arc<dyn ExecutionBackend> =
                match name.as_ref().trim().to_ascii_lowercase().as_str() {
                    "expr" | "expression" => Arc::new(ExprBackend::new()),
                    "shell" | "bash" => Arc::new(ShellBackend::new(settings.timeout)),
                    "python" | "python3" => Arc::new(PythonBackend::new(
                        settings.python_bin.clone(),
                        settings.timeout,
                    )),
                    other => {
                        return Err(CoreError::Validation(format!(
                            "Unknown execution backend: {other}"
                        )))
                    }
                };
            registry.register(backend)?;
        }
        Ok(registry)
    }

    /// Register `backend` under its name and every alias.
    ///
    /// Fails without registering anything if any of those names is taken.
    pub fn register(&mut self, backend: Arc<dyn ExecutionBackend>) -> Result<(), CoreError> {
        let names: Vec<String> = std::iter::once(backend.name())
            .chain(backend.aliases().iter().copied())
            .map(str::to_ascii_lowercase)
            .collect();

        if let Some(taken) = names.iter().find(|name| self.backends.contains_key(*name)) {
            return Err(CoreError::Conflict(format!(
                "Duplicate execution backend name: {taken}"
            )));
        }

        tracing::debug!(language = backend.name(), "Registered execution backend");
        for name in names {
            self.backends.insert(name, Arc::clone(&backend));
        }
        Ok(())
    }

    /// Backend serving `language`, compared case-insensitively.
    pub fn get(&self, language: &str) -> Option<Arc<dyn ExecutionBackend>> {
        self.backends
            .get(&language.to_ascii_lowercase())
            .map(Arc::clone)
    }

    /// Every registered name and alias, sorted.
    pub fn languages(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("languages", &self.languages())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
