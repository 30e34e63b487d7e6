//! Materializes per-script sandboxes on disk.
//!
//! Every preparation of a script gets its own generation directory, so a
//! sandbox in use is never rewritten underneath its script:
//!
//! ```text
//! {script_id}/
//!   .current              name of the committed generation
//!   {generation}/
//!     execution/          execution artifacts
//!     resources/          resource artifacts; also a raw search root
//!     .fingerprints.json  SHA-256 of each artifact's source location
//! ```
//!
//! A build only becomes the committed generation once its script is
//! registered ([`SandboxBuilder::commit`]); committing drops every older
//! generation. A failed preparation drops its own generation
//! ([`SandboxBuilder::abandon`]) and leaves the committed one alone.
//!
//! Artifacts whose location is unchanged since the committed generation are
//! copied over from it instead of being fetched again, unless marked
//! `recreate`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::serialization::TagRegistry;

use super::manifest::{ArtifactSpec, SandboxManifest};
use super::opener::ArtifactOpener;
use super::resolver::{normalize, Sandbox};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const EXECUTION_DIR: &str = "execution";
pub const RESOURCE_DIR: &str = "resources";
const FINGERPRINT_FILE: &str = ".fingerprints.json";
const CURRENT_FILE: &str = ".current";
const GENERATION_PREFIX: &str = "g-";
/// Downloads land next to the tier directories, never inside them.
const INCOMING_PREFIX: &str = ".incoming-";

pub struct SandboxBuilder {
    root: PathBuf,
    default_opener: Arc<dyn ArtifactOpener>,
    opener_tags: Arc<TagRegistry<Arc<dyn ArtifactOpener>>>,
}

impl SandboxBuilder {
    pub fn new(
        root: impl Into<PathBuf>,
        default_opener: Arc<dyn ArtifactOpener>,
        opener_tags: Arc<TagRegistry<Arc<dyn ArtifactOpener>>>,
    ) -> Self {
        Self {
            root: root.into(),
            default_opener,
            opener_tags,
        }
    }

    /// Working directory owned by `script_id`.
    pub fn directory_for(&self, script_id: &str) -> PathBuf {
        self.root.join(script_id)
    }

    /// Fetch the manifest's artifacts into a new generation and return a
    /// sandbox over them whose misses fall through to `parent`.
    ///
    /// On failure the new generation is removed again.
    pub async fn build(
        &self,
        script_id: &str,
        manifest: &SandboxManifest,
        parent: Arc<Sandbox>,
    ) -> Result<Sandbox, CoreError> {
        if manifest.is_empty() {
            return Err(CoreError::Sandbox(format!(
                "No sources given for the sandbox of script '{script_id}'"
            )));
        }

        let opener = match &manifest.opener {
            Some(tagged) => self.opener_tags.resolve(tagged.clone())?,
            None => Arc::clone(&self.default_opener),
        };

        let generation = self.directory_for(script_id).join(format!(
            "{GENERATION_PREFIX}{}",
            uuid::Uuid::new_v4().simple()
        ));
        let committed = self.committed(script_id).await;

        match self
            .materialize(script_id, manifest, opener.as_ref(), &generation, committed.as_deref())
            .await
        {
            Ok(materialized) => Ok(Sandbox::isolated(
                script_id,
                materialized.private,
                materialized.search_roots,
                parent,
            )
            .with_directory(generation)),
            Err(e) => {
                if let Err(cleanup) = self.abandon(&generation).await {
                    tracing::warn!(
                        script_id,
                        error = %cleanup,
                        "Failed to remove sandbox generation"
                    );
                }
                Err(e)
            }
        }
    }

    /// Make `generation` the committed sandbox of `script_id` and drop every
    /// other generation. `None` means the script no longer has a sandbox, so
    /// its whole directory goes.
    pub async fn commit(
        &self,
        script_id: &str,
        generation: Option<&Path>,
    ) -> Result<(), CoreError> {
        let Some(generation) = generation else {
            self.discard(script_id).await?;
            return Ok(());
        };

        let directory = self.directory_for(script_id);
        let name = generation
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|_| generation.parent() == Some(directory.as_path()))
            .ok_or_else(|| {
                CoreError::Internal(format!(
                    "'{}' is not a sandbox generation of script '{script_id}'",
                    generation.display()
                ))
            })?;

        let current = directory.join(CURRENT_FILE);
        let partial = directory.join(format!("{INCOMING_PREFIX}{CURRENT_FILE}"));
        tokio::fs::write(&partial, name)
            .await
            .map_err(|e| io_error("write", &partial, e))?;
        tokio::fs::rename(&partial, &current)
            .await
            .map_err(|e| io_error("write", &current, e))?;

        let mut entries = tokio::fs::read_dir(&directory)
            .await
            .map_err(|e| io_error("read", &directory, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("read", &directory, e))?
        {
            let path = entry.path();
            let stale = entry
                .file_name()
                .to_str()
                .is_some_and(|entry| entry.starts_with(GENERATION_PREFIX) && entry != name);
            if stale {
                tracing::debug!(
                    script_id,
                    path = %path.display(),
                    "Dropping superseded sandbox generation"
                );
                self.abandon(&path).await?;
            }
        }
        Ok(())
    }

    /// Remove one generation directory. Missing directories are fine.
    pub async fn abandon(&self, generation: &Path) -> Result<(), CoreError> {
        match tokio::fs::remove_dir_all(generation).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", generation, e)),
        }
    }

    /// Delete the working directory of `script_id`. Returns whether one existed.
    pub async fn discard(&self, script_id: &str) -> Result<bool, CoreError> {
        let directory = self.directory_for(script_id);
        match tokio::fs::remove_dir_all(&directory).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error("remove", &directory, e)),
        }
    }

    /// The committed generation of `script_id`, if it is still on disk.
    async fn committed(&self, script_id: &str) -> Option<PathBuf> {
        let directory = self.directory_for(script_id);
        let name = tokio::fs::read_to_string(directory.join(CURRENT_FILE))
            .await
            .ok()?;
        let name = name.trim();
        if !name.starts_with(GENERATION_PREFIX) || name.contains(['/', '\\']) {
            return None;
        }
        let generation = directory.join(name);
        tokio::fs::metadata(&generation)
            .await
            .is_ok_and(|meta| meta.is_dir())
            .then_some(generation)
    }

    async fn materialize(
        &self,
        script_id: &str,
        manifest: &SandboxManifest,
        opener: &dyn ArtifactOpener,
        generation: &Path,
        committed: Option<&Path>,
    ) -> Result<Materialized, CoreError> {
        let execution_dir = generation.join(EXECUTION_DIR);
        let resource_dir = generation.join(RESOURCE_DIR);
        for dir in [&execution_dir, &resource_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| io_error("create", dir, e))?;
        }

        let previous = match committed {
            Some(dir) => read_fingerprints(&dir.join(FINGERPRINT_FILE)).await,
            None => BTreeMap::new(),
        };
        let mut fingerprints = BTreeMap::new();
        let mut private = BTreeMap::new();

        for (tier, base, specs) in [
            (EXECUTION_DIR, &execution_dir, &manifest.execution),
            (RESOURCE_DIR, &resource_dir, &manifest.resources),
        ] {
            for spec in specs {
                let relative = normalize(&spec.path).ok_or_else(|| {
                    CoreError::Validation(format!("Invalid artifact path: '{}'", spec.path))
                })?;
                let target = base.join(&relative);
                let key = format!("{tier}/{relative}");
                let fingerprint = fingerprint(&spec.location);

                let reusable = match committed {
                    Some(dir) if !spec.recreate && previous.get(&key) == Some(&fingerprint) => {
                        let existing = dir.join(tier).join(&relative);
                        tokio::fs::metadata(&existing)
                            .await
                            .is_ok_and(|meta| meta.is_file())
                            .then_some(existing)
                    }
                    _ => None,
                };

                match reusable {
                    Some(existing) => {
                        reuse(&existing, &target).await?;
                        tracing::debug!(script_id, artifact = %key, "Sandbox artifact up to date");
                    }
                    None => {
                        fetch(opener, spec, generation, &target).await?;
                        tracing::info!(
                            script_id,
                            artifact = %key,
                            location = %spec.location,
                            "Fetched sandbox artifact"
                        );
                    }
                }

                fingerprints.insert(key, fingerprint);
                private.entry(relative).or_insert(target);
            }
        }

        write_fingerprints(&generation.join(FINGERPRINT_FILE), &fingerprints).await?;

        Ok(Materialized {
            private,
            search_roots: vec![execution_dir, resource_dir],
        })
    }
}

struct Materialized {
    private: BTreeMap<String, PathBuf>,
    search_roots: Vec<PathBuf>,
}

/// Hex SHA-256 of an artifact location.
pub fn fingerprint(location: &str) -> String {
    format!("{:x}", Sha256::digest(location.as_bytes()))
}

async fn create_parent(target: &Path) -> Result<(), CoreError> {
    match target.parent() {
        Some(parent) => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error("create", parent, e)),
        None => Ok(()),
    }
}

async fn reuse(existing: &Path, target: &Path) -> Result<(), CoreError> {
    create_parent(target).await?;
    tokio::fs::copy(existing, target)
        .await
        .map(drop)
        .map_err(|e| io_error("copy", existing, e))
}

async fn fetch(
    opener: &dyn ArtifactOpener,
    spec: &ArtifactSpec,
    generation: &Path,
    target: &Path,
) -> Result<(), CoreError> {
    let mut stream = opener.open(&spec.location).await?;
    create_parent(target).await?;

    let partial = generation.join(format!(
        "{INCOMING_PREFIX}{}",
        uuid::Uuid::new_v4().simple()
    ));
    let mut file = tokio::fs::File::create(&partial)
        .await
        .map_err(|e| io_error("create", &partial, e))?;
    let copied = async {
        tokio::io::copy(&mut stream, &mut file).await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = copied {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(CoreError::Sandbox(format!(
            "Cannot fetch '{}': {e}",
            spec.location
        )));
    }

    tokio::fs::rename(&partial, target)
        .await
        .map_err(|e| io_error("write", target, e))
}

async fn read_fingerprints(path: &Path) -> BTreeMap<String, String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => BTreeMap::new(),
    }
}

async fn write_fingerprints(
    path: &Path,
    fingerprints: &BTreeMap<String, String>,
) -> Result<(), CoreError> {
    let bytes = serde_json::to_vec_pretty(fingerprints)
        .map_err(|e| CoreError::Internal(e.to_string()))?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| io_error("write", path, e))
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> CoreError {
    CoreError::Sandbox(format!("Cannot {action} '{}': {err}", path.display()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::sandbox::opener::{opener_tags, StringOpener};

    fn builder(root: &Path, contents: &[(&str, &str)]) -> SandboxBuilder {
        let opener = contents
            .iter()
            .fold(StringOpener::default(), |opener, (location, text)| {
                opener.with(*location, *text)
            });
        SandboxBuilder::new(
            root,
            Arc::new(opener),
            Arc::new(opener_tags(None).expect("tags")),
        )
    }

    fn manifest(resources: Vec<ArtifactSpec>) -> SandboxManifest {
        SandboxManifest {
            resources,
            ..SandboxManifest::default()
        }
    }

    fn host() -> Arc<Sandbox> {
        Arc::new(Sandbox::host(Vec::new()))
    }

    fn read(sandbox: &Sandbox, name: &str) -> String {
        let path = sandbox.resolve(name).expect("resolve");
        std::fs::read_to_string(path).expect("read")
    }

    #[tokio::test]
    async fn builds_private_artifacts_under_the_script_directory() {
        let root = tempfile::tempdir().expect("tempdir");
        let builder = builder(root.path(), &[("mem:tool", "#!/bin/sh"), ("mem:words", "a b")]);
        let manifest = SandboxManifest {
            execution: vec![ArtifactSpec::new("bin/tool", "mem:tool")],
            resources: vec![ArtifactSpec::new("data/words.txt", "mem:words")],
            opener: None,
        };

        let sandbox = builder.build("greeter", &manifest, host()).await.expect("build");

        let generation = sandbox.directory().expect("generation").to_path_buf();
        assert_eq!(generation.parent(), Some(root.path().join("greeter").as_path()));
        assert_eq!(sandbox.name(), "greeter");
        assert_eq!(read(&sandbox, "data/words.txt"), "a b");
        assert_eq!(
            sandbox.resolve("bin/tool"),
            Some(generation.join("execution/bin/tool"))
        );
        assert_eq!(
            sandbox.search_path(),
            vec![generation.join("execution"), generation.join("resources")]
        );
    }

    #[tokio::test]
    async fn empty_manifest_is_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        let result = builder(root.path(), &[])
            .build("x", &SandboxManifest::default(), host())
            .await;
        assert_matches!(result, Err(CoreError::Sandbox(msg)) if msg.starts_with("No sources given"));
    }

    #[tokio::test]
    async fn unchanged_artifacts_are_not_fetched_again() {
        let root = tempfile::tempdir().expect("tempdir");
        let spec = ArtifactSpec::new("words.txt", "mem:words");

        let first = builder(root.path(), &[("mem:words", "v1")]);
        let sandbox = first
            .build("s", &manifest(vec![spec.clone()]), host())
            .await
            .expect("first build");
        first.commit("s", sandbox.directory()).await.expect("commit");
        let sandbox = builder(root.path(), &[("mem:words", "v2")])
            .build("s", &manifest(vec![spec.clone()]), host())
            .await
            .expect("second build");
        assert_eq!(read(&sandbox, "words.txt"), "v1");

        let recreate = ArtifactSpec {
            recreate: true,
            ..spec
        };
        let sandbox = builder(root.path(), &[("mem:words", "v2")])
            .build("s", &manifest(vec![recreate]), host())
            .await
            .expect("recreate build");
        assert_eq!(read(&sandbox, "words.txt"), "v2");
    }

    #[tokio::test]
    async fn changed_locations_are_fetched_again() {
        let root = tempfile::tempdir().expect("tempdir");
        let builder = builder(root.path(), &[("mem:v1", "one"), ("mem:v2", "two")]);

        let first = builder
            .build("s", &manifest(vec![ArtifactSpec::new("w.txt", "mem:v1")]), host())
            .await
            .expect("first build");
        builder.commit("s", first.directory()).await.expect("commit");
        let sandbox = builder
            .build("s", &manifest(vec![ArtifactSpec::new("w.txt", "mem:v2")]), host())
            .await
            .expect("second build");

        assert_eq!(read(&sandbox, "w.txt"), "two");
        assert_eq!(read(&first, "w.txt"), "one");
    }

    #[tokio::test]
    async fn commit_drops_superseded_generations() {
        let root = tempfile::tempdir().expect("tempdir");
        let builder = builder(root.path(), &[("mem:a", "a"), ("mem:b", "b")]);

        let first = builder
            .build("s", &manifest(vec![ArtifactSpec::new("a.txt", "mem:a")]), host())
            .await
            .expect("first build");
        builder.commit("s", first.directory()).await.expect("commit first");
        let second = builder
            .build("s", &manifest(vec![ArtifactSpec::new("b.txt", "mem:b")]), host())
            .await
            .expect("second build");
        assert!(first.directory().expect("first").is_dir());

        builder.commit("s", second.directory()).await.expect("commit second");

        assert!(!first.directory().expect("first").exists());
        assert_eq!(read(&second, "b.txt"), "b");
        assert_eq!(second.resolve("a.txt"), None);
    }

    #[tokio::test]
    async fn failed_build_leaves_the_committed_generation_alone() {
        let root = tempfile::tempdir().expect("tempdir");
        let builder = builder(root.path(), &[("mem:one", "ONE"), ("mem:two", "TWO")]);

        let live = builder
            .build("s", &manifest(vec![ArtifactSpec::new("w.txt", "mem:one")]), host())
            .await
            .expect("first build");
        builder.commit("s", live.directory()).await.expect("commit");

        let result = builder
            .build(
                "s",
                &manifest(vec![
                    ArtifactSpec::new("w.txt", "mem:two"),
                    ArtifactSpec::new("z.txt", "mem:absent"),
                ]),
                host(),
            )
            .await;

        assert_matches!(result, Err(CoreError::Sandbox(_)));
        assert_eq!(read(&live, "w.txt"), "ONE");
        let generations = std::fs::read_dir(root.path().join("s"))
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .count();
        assert_eq!(generations, 1);
    }

    #[tokio::test]
    async fn committing_without_a_generation_discards_the_directory() {
        let root = tempfile::tempdir().expect("tempdir");
        let builder = builder(root.path(), &[("mem:a", "a")]);
        let sandbox = builder
            .build("s", &manifest(vec![ArtifactSpec::new("a.txt", "mem:a")]), host())
            .await
            .expect("build");
        builder.commit("s", sandbox.directory()).await.expect("commit");

        builder.commit("s", None).await.expect("commit none");

        assert!(!root.path().join("s").exists());
    }

    #[tokio::test]
    async fn artifacts_named_like_downloads_do_not_collide() {
        let root = tempfile::tempdir().expect("tempdir");
        let builder = builder(root.path(), &[("mem:p", "partial"), ("mem:t", "text")]);

        let sandbox = builder
            .build(
                "s",
                &manifest(vec![
                    ArtifactSpec::new("x.part", "mem:p"),
                    ArtifactSpec::new("x.txt", "mem:t"),
                ]),
                host(),
            )
            .await
            .expect("build");

        assert_eq!(read(&sandbox, "x.part"), "partial");
        assert_eq!(read(&sandbox, "x.txt"), "text");
    }

    #[tokio::test]
    async fn failed_fetch_is_reported() {
        let root = tempfile::tempdir().expect("tempdir");
        let result = builder(root.path(), &[])
            .build("s", &manifest(vec![ArtifactSpec::new("a.txt", "mem:absent")]), host())
            .await;
        assert_matches!(result, Err(CoreError::Sandbox(msg)) if msg.contains("mem:absent"));
    }

    #[tokio::test]
    async fn escaping_paths_are_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        let result = builder(root.path(), &[("mem:a", "a")])
            .build("s", &manifest(vec![ArtifactSpec::new("../a.txt", "mem:a")]), host())
            .await;
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn manifest_can_select_a_tagged_opener() {
        let root = tempfile::tempdir().expect("tempdir");
        let manifest = SandboxManifest {
            resources: vec![ArtifactSpec::new("greeting.txt", "greeting")],
            opener: Some(
                serde_yaml::from_str("!string\ncontents:\n  greeting: hello\n").expect("yaml"),
            ),
            ..SandboxManifest::default()
        };

        let sandbox = builder(root.path(), &[])
            .build("s", &manifest, host())
            .await
            .expect("build");
        assert_eq!(read(&sandbox, "greeting.txt"), "hello");
    }

    #[tokio::test]
    async fn discard_removes_the_directory() {
        let root = tempfile::tempdir().expect("tempdir");
        let builder = builder(root.path(), &[("mem:a", "a")]);
        builder
            .build("s", &manifest(vec![ArtifactSpec::new("a.txt", "mem:a")]), host())
            .await
            .expect("build");

        assert!(builder.discard("s").await.expect("discard"));
        assert!(!root.path().join("s").exists());
        assert!(!builder.discard("s").await.expect("discard again"));
    }

    #[test]
    fn fingerprints_are_hex_sha256() {
        assert_eq!(
            fingerprint(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
