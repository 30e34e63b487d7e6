//! The script host: accepts scripts, keeps them persisted and prepared, and
//! runs them on demand.
//!
//! Storage is a registry stack over the `scripts/` directory of the home
//! directory:
//!
//! ```text
//! CachingRegistry<String, PreparedObject>
//! └── ConvertingRegistry (id <-> id.yaml, PreparedObject <-> YAML text)
//!     └── FileRegistry (home/scripts)
//! ```
//!
//! Sandboxes are materialized under `home/sandboxes/{id}`, one generation
//! per preparation; a generation is committed once its script is registered.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::RegexSet;
use scripter_registry::{
    CachingRegistry, ConvertingRegistry, FileRegistry, Registry, SuffixConverter,
};
use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::prepared::{dependants_of, from_registry, PreparedCodec, PreparedObject, Preparer};
use crate::sandbox::{opener_tags, Sandbox, SandboxBuilder, SchemeOpener};
use crate::script::Script;
use crate::scripting::BackendRegistry;
use crate::serialization::load_document;
use crate::transformer::{pipe_transformer, TransformerPipeline};
use crate::value::{Namespace, Value};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const SCRIPTS_DIR: &str = "scripts";
pub const SANDBOXES_DIR: &str = "sandboxes";
const SCRIPT_SUFFIX: &str = ".yaml";
const SCRIPT_FILENAME_PATTERN: &str = r"^[a-zA-Z][-_a-zA-Z0-9]*\.yaml$";

/// Startup configuration for a [`Scripter`].
#[derive(Clone, Debug)]
pub struct ScripterOptions {
    pub home: PathBuf,
    /// Directories the host sandbox resolves against.
    pub host_search_path: Vec<PathBuf>,
    /// Root for `bundle:` artifact locations.
    pub bundle_dir: Option<PathBuf>,
    pub backends: BackendRegistry,
    pub transformers: TransformerPipeline,
    /// Build transformer engines in the background at startup.
    pub warm_up: bool,
}

impl ScripterOptions {
    /// Expression backend and the `pipe` transformer, no host search path.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let mut transformers = TransformerPipeline::new();
        // A fresh pipeline cannot already hold a `pipe` transformer.
        let _ = transformers.register(Arc::new(pipe_transformer()));
        Self {
            home: home.into(),
            host_search_path: Vec::new(),
            bundle_dir: None,
            backends: BackendRegistry::with_expr(),
            transformers,
            warm_up: false,
        }
    }

    pub fn host_search_path(mut self, path: Vec<PathBuf>) -> Self {
        self.host_search_path = path;
        self
    }

    pub fn bundle_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundle_dir = Some(dir.into());
        self
    }

    pub fn backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = backends;
        self
    }

    pub fn transformers(mut self, transformers: TransformerPipeline) -> Self {
        self.transformers = transformers;
        self
    }

    pub fn warm_up(mut self, warm_up: bool) -> Self {
        self.warm_up = warm_up;
        self
    }
}

/// Outcome of [`Scripter::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Completed(Value),
    /// The id names a service; services are not invoked directly.
    NotInvocable,
}

pub struct Scripter {
    registry: CachingRegistry<String, PreparedObject>,
    preparer: Arc<Preparer>,
    /// One lock per script id so mutations of the same id never interleave.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Scripter {
    /// Open the home directory, loading and preparing every stored script.
    ///
    /// Any stored script that fails to prepare fails the whole startup.
    pub async fn open(options: ScripterOptions) -> Result<Self, CoreError> {
        let scripts_dir = options.home.join(SCRIPTS_DIR);
        let sandboxes_dir = options.home.join(SANDBOXES_DIR);
        for dir in [&scripts_dir, &sandboxes_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                CoreError::Internal(format!("Cannot create '{}': {e}", dir.display()))
            })?;
        }

        if options.warm_up {
            // Fire and forget; first use waits on the same build.
            drop(options.transformers.warm_up());
        }

        let sandboxes = SandboxBuilder::new(
            sandboxes_dir,
            Arc::new(SchemeOpener::new(options.bundle_dir.clone())),
            Arc::new(opener_tags(options.bundle_dir.clone())?),
        );
        let preparer = Arc::new(Preparer::new(
            options.backends,
            options.transformers,
            sandboxes,
            Arc::new(Sandbox::host(options.host_search_path)),
        ));

        let files = FileRegistry::open_with_pattern(scripts_dir.clone(), SCRIPT_FILENAME_PATTERN)
            .await
            .map_err(from_registry)?;
        let converting = ConvertingRegistry::new(
            files,
            SuffixConverter::new(SCRIPT_SUFFIX),
            PreparedCodec::new(Arc::clone(&preparer)),
        );
        let registry = CachingRegistry::new(converting)
            .await
            .map_err(from_registry)?;

        for (id, object) in registry.list().await.map_err(from_registry)? {
            preparer
                .sandboxes()
                .commit(&id, object.sandbox_dir())
                .await?;
        }

        tracing::info!(
            home = %options.home.display(),
            scripts = registry.len().await,
            languages = ?preparer.backends().languages(),
            "Scripter ready"
        );

        Ok(Self {
            registry,
            preparer,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Add a script from its YAML text.
    ///
    /// Returns the source previously stored under the same id. Without
    /// `replace`, an occupied id is a [`CoreError::Conflict`].
    pub async fn add(&self, text: &str, replace: bool) -> Result<Option<String>, CoreError> {
        let document = load_document(text)?;
        let id = document.script.id().to_string();
        self.locked(&id, async {
            let previous = self.lookup(&id).await?;
            if previous.is_some() && !replace {
                tracing::warn!(script_id = %id, "Refusing to replace existing script");
                return Err(CoreError::Conflict(format!("Can't replace script: {id}")));
            }

            let resolved = self.resolve_services(&document.script).await?;
            let prepared = self
                .preparer
                .prepare(document.script, document.source, &resolved)
                .await?;
            let sandbox_dir = prepared.sandbox_dir().map(|dir| dir.to_path_buf());

            let sandboxes = self.preparer.sandboxes();
            if let Err(e) = self.registry.register(id.clone(), prepared).await {
                if let Some(dir) = &sandbox_dir {
                    if let Err(cleanup) = sandboxes.abandon(dir).await {
                        tracing::warn!(
                            script_id = %id,
                            error = %cleanup,
                            "Failed to remove sandbox generation"
                        );
                    }
                }
                return Err(from_registry(e));
            }

            if let Err(e) = sandboxes.commit(&id, sandbox_dir.as_deref()).await {
                tracing::warn!(script_id = %id, error = %e, "Failed to commit sandbox");
            }

            tracing::info!(script_id = %id, replaced = previous.is_some(), "Script added");
            Ok(previous.map(|object| object.source().to_string()))
        })
        .await
    }

    /// Run the invocable script `id`.
    ///
    /// Invocation variables override the script's globals; service bindings
    /// override both.
    pub async fn execute(
        &self,
        id: &str,
        variables: Option<Namespace>,
    ) -> Result<Execution, CoreError> {
        let object = self.lookup(id).await?.ok_or_else(|| {
            tracing::warn!(script_id = id, "Ignoring non-existent script");
            CoreError::NotFound {
                entity: "Script",
                id: id.to_string(),
            }
        })?;

        let prepared = match object {
            PreparedObject::Script(prepared) => prepared,
            PreparedObject::Service(_) => {
                tracing::debug!(script_id = id, "Services are not invocable");
                return Ok(Execution::NotInvocable);
            }
        };

        let resolved = self.resolve_services(prepared.script()).await?;
        let namespace =
            crate::composer::populate_namespace(prepared.script(), variables, &resolved)?;

        let started = std::time::Instant::now();
        let value = prepared.run(namespace).await?;
        tracing::debug!(
            script_id = id,
            elapsed_ms = elapsed_ms(started.elapsed()),
            "Script executed"
        );
        Ok(Execution::Completed(value))
    }

    /// Remove the script `id`, returning its source.
    ///
    /// A service that other scripts still declare cannot be removed.
    pub async fn remove(&self, id: &str) -> Result<Option<String>, CoreError> {
        self.locked(id, async {
            let Some(object) = self.lookup(id).await? else {
                return Ok(None);
            };

            if object.is_service() {
                let all = self.registry.list().await.map_err(from_registry)?;
                let dependants = dependants_of(id, all.iter().map(|(_, object)| object));
                if !dependants.is_empty() {
                    return Err(CoreError::Dependency(format!(
                        "{id} has dependants: [{}]",
                        dependants.join(", ")
                    )));
                }
            }

            self.registry
                .deregister(&id.to_string())
                .await
                .map_err(from_registry)?;

            if let Err(e) = self.preparer.sandboxes().discard(id).await {
                tracing::warn!(script_id = id, error = %e, "Failed to discard sandbox");
            }

            tracing::info!(script_id = id, "Script removed");
            Ok(Some(object.source().to_string()))
        })
        .await
    }

    /// All script ids, sorted.
    pub async fn list_ids(&self) -> Result<Vec<String>, CoreError> {
        let mut ids: Vec<String> = self
            .registry
            .list()
            .await
            .map_err(from_registry)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Sorted ids matching any of `patterns` (unanchored regexes). No
    /// patterns means every id.
    pub async fn list_ids_matching(&self, patterns: &[String]) -> Result<Vec<String>, CoreError> {
        let ids = self.list_ids().await?;
        if patterns.is_empty() {
            return Ok(ids);
        }
        let set = RegexSet::new(patterns)
            .map_err(|e| CoreError::Validation(format!("Invalid id pattern: {e}")))?;
        Ok(ids.into_iter().filter(|id| set.is_match(id)).collect())
    }

    pub async fn get_source(&self, id: &str) -> Result<Option<String>, CoreError> {
        Ok(self
            .lookup(id)
            .await?
            .map(|object| object.source().to_string()))
    }

    /// The script as submitted.
    pub async fn get_script(&self, id: &str) -> Result<Option<Script>, CoreError> {
        Ok(self.lookup(id).await?.map(|object| object.script().clone()))
    }

    pub async fn get_body(&self, id: &str) -> Result<Option<String>, CoreError> {
        Ok(self
            .lookup(id)
            .await?
            .map(|object| object.script().body().to_string()))
    }

    pub async fn count(&self) -> usize {
        self.registry.len().await
    }

    pub fn languages(&self) -> Vec<&str> {
        self.preparer.backends().languages()
    }

    async fn lookup(&self, id: &str) -> Result<Option<PreparedObject>, CoreError> {
        self.registry
            .lookup(&id.to_string())
            .await
            .map_err(from_registry)
    }

    async fn resolve_services(
        &self,
        script: &Script,
    ) -> Result<BTreeMap<String, Option<PreparedObject>>, CoreError> {
        let mut resolved = BTreeMap::new();
        for name in script.services() {
            resolved.insert(name.clone(), self.lookup(name).await?);
        }
        Ok(resolved)
    }

    /// Run `operation` holding the lock of `id`. The lock entry is dropped
    /// again once nobody else holds or waits for it.
    async fn locked<T>(
        &self,
        id: &str,
        operation: impl Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(id.to_string()).or_default())
        };

        let result = {
            let _guard = lock.lock().await;
            operation.await
        };

        let mut locks = self.locks.lock().await;
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
        result
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
