use scripter_registry::RegistryError;

use crate::scripting::BackendError;

/// Every rejected operation in the core surfaces as a `CoreError`.
///
/// The variant classifies the rejection; resource failures keep their
/// underlying cause available through `source()`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A service dependency is missing, of the wrong kind, or still in use.
    #[error("Dependency error: {0}")]
    Dependency(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Script '{script_id}' failed: {source}")]
    Backend {
        script_id: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn backend(script_id: impl Into<String>, source: BackendError) -> Self {
        Self::Backend {
            script_id: script_id.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
