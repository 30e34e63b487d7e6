use std::path::PathBuf;

/// Errors raised by registry layers.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The key cannot be used by this store (e.g. it is not a valid filename).
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The backing directory is missing, unusable, or not a directory.
    #[error("Invalid directory: {0}")]
    Directory(String),

    /// The configured filename pattern is not a valid regular expression.
    #[error("Invalid filename pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// An I/O operation on a stored entry failed.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Converting between the exposed and the stored shapes failed.
    #[error("Conversion failed: {0}")]
    Conversion(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RegistryError {
    /// Wrap an arbitrary conversion failure, keeping it as the source.
    pub fn conversion<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Conversion(err.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_key() {
        let err = RegistryError::InvalidKey("9lives".to_string());
        assert_eq!(err.to_string(), "Invalid key: 9lives");
    }

    #[test]
    fn display_io_includes_path() {
        let err = RegistryError::io(
            "/tmp/registry/a.yaml",
            std::io::Error::other("disk full"),
        );
        assert_eq!(
            err.to_string(),
            "I/O error on '/tmp/registry/a.yaml': disk full"
        );
    }

    #[test]
    fn conversion_keeps_source() {
        let err = RegistryError::conversion("bad yaml");
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "Conversion failed: bad yaml");
    }
}
