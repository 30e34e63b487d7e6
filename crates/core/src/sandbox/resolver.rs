//! Two-tier, private-first artifact resolution.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// An isolated view of artifacts for one script.
///
/// Resolving a name checks, in order: the private artifact index (exact
/// relative path), the private search roots, and finally the parent sandbox.
/// The host sandbox has no private index and no parent; it only carries the
/// host search path.
#[derive(Debug)]
pub struct Sandbox {
    name: String,
    private: BTreeMap<String, PathBuf>,
    search_roots: Vec<PathBuf>,
    parent: Option<Arc<Sandbox>>,
    directory: Option<PathBuf>,
}

impl Sandbox {
    /// The root sandbox over the host search path.
    pub fn host(search_path: Vec<PathBuf>) -> Self {
        Self {
            name: "host".to_string(),
            private: BTreeMap::new(),
            search_roots: search_path,
            parent: None,
            directory: None,
        }
    }

    /// A child sandbox whose own artifacts shadow `parent`'s.
    pub fn isolated(
        name: impl Into<String>,
        private: BTreeMap<String, PathBuf>,
        search_roots: Vec<PathBuf>,
        parent: Arc<Sandbox>,
    ) -> Self {
        Self {
            name: name.into(),
            private,
            search_roots,
            parent: Some(parent),
            directory: None,
        }
    }

    /// Record the on-disk directory this sandbox's artifacts live in.
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Directory owned by this sandbox, if it was materialized on disk.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<Sandbox>> {
        self.parent.as_ref()
    }

    /// Locate `name`, private tier first. Names must be relative and may not
    /// step outside a root.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = normalize(name)?;
        self.resolve_own(&relative)
            .or_else(|| self.parent.as_ref().and_then(|parent| parent.resolve(name)))
    }

    /// Every location `name` resolves to, most private first.
    pub fn resolve_all(&self, name: &str) -> Vec<PathBuf> {
        let Some(relative) = normalize(name) else {
            return Vec::new();
        };

        let mut found = Vec::new();
        let mut current = Some(self);
        while let Some(sandbox) = current {
            if let Some(path) = sandbox.private.get(&relative) {
                found.push(path.clone());
            }
            found.extend(
                sandbox
                    .search_roots
                    .iter()
                    .map(|root| root.join(&relative))
                    .filter(|candidate| candidate.is_file() && !found.contains(candidate))
                    .collect::<Vec<_>>(),
            );
            current = sandbox.parent.as_deref();
        }
        found
    }

    /// Directories a subprocess should search, most private first.
    pub fn search_path(&self) -> Vec<PathBuf> {
        let mut path = Vec::new();
        let mut current = Some(self);
        while let Some(sandbox) = current {
            for root in &sandbox.search_roots {
                if !path.contains(root) {
                    path.push(root.clone());
                }
            }
            current = sandbox.parent.as_deref();
        }
        path
    }

    fn resolve_own(&self, relative: &str) -> Option<PathBuf> {
        if let Some(path) = self.private.get(relative) {
            return Some(path.clone());
        }
        self.search_roots
            .iter()
            .map(|root| root.join(relative))
            .find(|candidate| candidate.is_file())
    }
}

/// Canonical relative form of an artifact name, or `None` if it is absolute
/// or escapes its root.
pub(crate) fn normalize(name: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in Path::new(name.trim()).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
