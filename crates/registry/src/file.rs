//! Durable one-file-per-key leaf store.
//!
//! Keys are filenames inside a single directory and values are the file
//! contents. Every key is checked against a filename pattern before it
//! touches the filesystem, so keys can never escape the directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use tokio::fs;

use crate::{Registry, RegistryError, RegistryResult};

/// Default filename pattern: starts with a letter, continues with letters,
/// digits, `-` or `_`, and carries at most one extension.
pub const DEFAULT_FILENAME_PATTERN: &str = r"^[a-zA-Z][-_a-zA-Z0-9]*(\.[_a-zA-Z0-9]+)?$";

/// Prefix for in-flight writes. Never matches a valid filename.
const TEMP_PREFIX: &str = ".tmp-";

/// Filesystem-backed `String` to `String` store.
#[derive(Debug)]
pub struct FileRegistry {
    directory: PathBuf,
    pattern: Regex,
}

impl FileRegistry {
    /// Open (creating if needed) a store under `directory` using
    /// [`DEFAULT_FILENAME_PATTERN`].
    pub async fn open(directory: impl Into<PathBuf>) -> RegistryResult<Self> {
        Self::open_with_pattern(directory, DEFAULT_FILENAME_PATTERN).await
    }

    /// Open (creating if needed) a store under `directory`, accepting only
    /// filenames that match `pattern`.
    pub async fn open_with_pattern(
        directory: impl Into<PathBuf>,
        pattern: &str,
    ) -> RegistryResult<Self> {
        let directory = directory.into();
        let pattern = Regex::new(pattern).map_err(|source| RegistryError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        ensure_directory(&directory).await?;

        tracing::debug!(directory = %directory.display(), "Opened file registry");
        Ok(Self { directory, pattern })
    }

    /// The directory holding the stored files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Resolve `filename` to a path, rejecting names outside the pattern.
    fn path_for(&self, filename: &str) -> RegistryResult<PathBuf> {
        if !self.pattern.is_match(filename) {
            return Err(RegistryError::InvalidKey(format!(
                "Invalid filename: {filename}"
            )));
        }
        Ok(self.directory.join(filename))
    }
}

/// Validate `directory`, creating it when absent.
async fn ensure_directory(directory: &Path) -> RegistryResult<()> {
    match fs::metadata(directory).await {
        Ok(meta) if !meta.is_dir() => {
            return Err(RegistryError::Directory(format!(
                "Existing file '{}' is not a directory",
                directory.display()
            )));
        }
        Ok(meta) if meta.permissions().readonly() => {
            return Err(RegistryError::Directory(format!(
                "Unreadable/unwritable directory: {}",
                directory.display()
            )));
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(directory).await.map_err(|e| {
                RegistryError::Directory(format!(
                    "Can't create directory {}: {e}",
                    directory.display()
                ))
            })?;
        }
        Err(e) => return Err(RegistryError::io(directory, e)),
    }
    Ok(())
}

/// Read a file, mapping "not found" to `None`.
async fn read_existing(path: &Path) -> RegistryResult<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Error reading registry file");
            Err(RegistryError::io(path, e))
        }
    }
}

#[async_trait]
impl Registry<String, String> for FileRegistry {
    async fn register(&self, filename: String, contents: String) -> RegistryResult<Option<String>> {
        let path = self.path_for(&filename)?;
        tracing::debug!(%filename, "Registering file");

        let previous = read_existing(&path).await?;

        // Write beside the target and rename so readers never see a partial file.
        let temp = self.directory.join(format!("{TEMP_PREFIX}{filename}"));
        let written = async {
            fs::write(&temp, contents.as_bytes()).await?;
            fs::rename(&temp, &path).await
        }
        .await;

        if let Err(e) = written {
            tracing::error!(%filename, error = %e, "Error creating registry file");
            let _ = fs::remove_file(&temp).await;
            return Err(RegistryError::io(path, e));
        }

        Ok(previous)
    }

    async fn deregister(&self, filename: &String) -> RegistryResult<Option<String>> {
        let path = self.path_for(filename)?;
        tracing::debug!(%filename, "Deregistering file");

        let previous = read_existing(&path).await?;
        if previous.is_some() {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                // Lost a race with another deregister; the end state is the same.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!(%filename, error = %e, "Can't delete registry file");
                    return Err(RegistryError::io(path, e));
                }
            }
        }

        Ok(previous)
    }

    async fn lookup(&self, filename: &String) -> RegistryResult<Option<String>> {
        let path = self.path_for(filename)?;
        let contents = read_existing(&path).await?;
        tracing::debug!(%filename, found = contents.is_some(), "Looked up file");
        Ok(contents)
    }

    async fn list(&self) -> RegistryResult<Vec<(String, String)>> {
        let mut dir = fs::read_dir(&self.directory)
            .await
            .map_err(|e| RegistryError::io(&self.directory, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| RegistryError::io(&self.directory, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| RegistryError::io(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }

            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !self.pattern.is_match(&filename) {
                tracing::debug!(%filename, "Skipping file outside the filename pattern");
                continue;
            }

            let path = entry.path();
            let contents = fs::read_to_string(&path)
                .await
                .map_err(|e| RegistryError::io(&path, e))?;
            entries.push((filename, contents));
        }

        tracing::debug!(count = entries.len(), "Listed registry files");
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
