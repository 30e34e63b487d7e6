//! Scripts turned into something runnable.
//!
//! Preparing a script applies its transformer, materializes its sandbox,
//! binds it to an execution backend and, for services, runs it once to
//! obtain the instance other scripts bind to. [`PreparedCodec`] plugs the
//! [`Preparer`] into the registry stack so stored YAML text comes back as
//! prepared objects.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use scripter_registry::{Converter, RegistryError, RegistryResult};

use crate::composer::populate_namespace;
use crate::error::CoreError;
use crate::sandbox::{Sandbox, SandboxBuilder};
use crate::script::{Script, Usage};
use crate::scripting::{bind, BackendRegistry, Executable};
use crate::serialization::{load_document, ScriptDocument};
use crate::transformer::TransformerPipeline;
use crate::value::{Namespace, Value};

/// What the registry holds for each script id.
#[derive(Clone)]
pub enum PreparedObject {
    Script(Arc<PreparedScript>),
    Service(Arc<PreparedService>),
}

impl PreparedObject {
    /// The script as submitted, before any transformation.
    pub fn script(&self) -> &Script {
        match self {
            Self::Script(prepared) => &prepared.script,
            Self::Service(prepared) => &prepared.script,
        }
    }

    /// The persisted YAML text.
    pub fn source(&self) -> &str {
        match self {
            Self::Script(prepared) => &prepared.source,
            Self::Service(prepared) => &prepared.source,
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self, Self::Service(_))
    }

    /// Sandbox generation this preparation materialized, if any.
    pub fn sandbox_dir(&self) -> Option<&Path> {
        match self {
            Self::Script(prepared) => prepared.sandbox_dir.as_deref(),
            Self::Service(prepared) => prepared.sandbox_dir.as_deref(),
        }
    }
}

/// Identity comparison: two handles are equal when they share one preparation.
impl PartialEq for PreparedObject {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Script(a), Self::Script(b)) => Arc::ptr_eq(a, b),
            (Self::Service(a), Self::Service(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for PreparedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_service() { "Service" } else { "Script" };
        f.debug_struct(kind)
            .field("id", &self.script().id())
            .field("language", &self.script().language())
            .finish()
    }
}

/// An invocable script bound to its backend.
pub struct PreparedScript {
    script: Script,
    source: String,
    executable: Arc<dyn Executable>,
    sandbox_dir: Option<PathBuf>,
}

impl PreparedScript {
    pub fn new(script: Script, source: String, executable: Arc<dyn Executable>) -> Self {
        Self {
            script,
            source,
            executable,
            sandbox_dir: None,
        }
    }

    pub fn with_sandbox_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.sandbox_dir = dir;
        self
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub async fn run(&self, namespace: Namespace) -> Result<Value, CoreError> {
        self.executable
            .run(namespace)
            .await
            .map_err(|e| CoreError::backend(self.script.id(), e))
    }
}

/// A service script together with the instance its one execution produced.
pub struct PreparedService {
    script: Script,
    source: String,
    instance: Value,
    sandbox_dir: Option<PathBuf>,
}

impl PreparedService {
    pub fn new(script: Script, source: String, instance: Value) -> Self {
        Self {
            script,
            source,
            instance,
            sandbox_dir: None,
        }
    }

    pub fn with_sandbox_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.sandbox_dir = dir;
        self
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn instance(&self) -> &Value {
        &self.instance
    }
}

// ---------------------------------------------------------------------------
// Preparer
// ---------------------------------------------------------------------------

pub struct Preparer {
    backends: BackendRegistry,
    transformers: TransformerPipeline,
    sandboxes: SandboxBuilder,
    host: Arc<Sandbox>,
}

impl Preparer {
    pub fn new(
        backends: BackendRegistry,
        transformers: TransformerPipeline,
        sandboxes: SandboxBuilder,
        host: Arc<Sandbox>,
    ) -> Self {
        Self {
            backends,
            transformers,
            sandboxes,
            host,
        }
    }

    pub fn sandboxes(&self) -> &SandboxBuilder {
        &self.sandboxes
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    /// Prepare `script`. Services are executed once, with their own service
    /// bindings taken from `resolved`.
    ///
    /// A sandbox built here stays uncommitted; the caller commits it once the
    /// result is registered. If preparation fails it is removed again.
    pub async fn prepare(
        &self,
        script: Script,
        source: String,
        resolved: &BTreeMap<String, Option<PreparedObject>>,
    ) -> Result<PreparedObject, CoreError> {
        let transformed = self.transformers.apply(script.clone()).await?;

        let sandbox = match transformed.sandbox() {
            Some(manifest) => Arc::new(
                self.sandboxes
                    .build(transformed.id(), manifest, Arc::clone(&self.host))
                    .await?,
            ),
            None => Arc::clone(&self.host),
        };
        let sandbox_dir = sandbox.directory().map(Path::to_path_buf);

        let prepared = self
            .bind_and_instantiate(script, source, &transformed, sandbox, resolved)
            .await;
        match prepared {
            Ok(object) => Ok(object),
            Err(e) => {
                if let Some(dir) = &sandbox_dir {
                    if let Err(cleanup) = self.sandboxes.abandon(dir).await {
                        tracing::warn!(error = %cleanup, "Failed to remove sandbox generation");
                    }
                }
                Err(e)
            }
        }
    }

    async fn bind_and_instantiate(
        &self,
        script: Script,
        source: String,
        transformed: &Script,
        sandbox: Arc<Sandbox>,
        resolved: &BTreeMap<String, Option<PreparedObject>>,
    ) -> Result<PreparedObject, CoreError> {
        let sandbox_dir = sandbox.directory().map(Path::to_path_buf);
        let backend = self.backends.get(transformed.language()).ok_or_else(|| {
            CoreError::Validation(format!("No such language: {}", transformed.language()))
        })?;
        let executable = bind(backend, transformed.body(), sandbox)
            .map_err(|e| CoreError::backend(script.id(), e))?;

        match script.usage() {
            Usage::Invocable => Ok(PreparedObject::Script(Arc::new(
                PreparedScript::new(script, source, executable).with_sandbox_dir(sandbox_dir),
            ))),
            Usage::Service => {
                let namespace = populate_namespace(transformed, None, resolved)?;
                let instance = executable
                    .run(namespace)
                    .await
                    .map_err(|e| CoreError::backend(script.id(), e))?;
                tracing::debug!(
                    script_id = script.id(),
                    kind = instance.type_name(),
                    "Service instantiated"
                );
                Ok(PreparedObject::Service(Arc::new(
                    PreparedService::new(script, source, instance).with_sandbox_dir(sandbox_dir),
                )))
            }
        }
    }

    /// Prepare a whole batch of stored documents, services first and in
    /// dependency order, so services that bind other services find them
    /// ready. Results come back in input order.
    pub async fn prepare_batch(
        &self,
        documents: Vec<ScriptDocument>,
    ) -> Result<Vec<PreparedObject>, CoreError> {
        let service_ids: BTreeSet<String> = documents
            .iter()
            .filter(|document| document.script.usage() == Usage::Service)
            .map(|document| document.script.id().to_string())
            .collect();

        let mut prepared: Vec<Option<PreparedObject>> = vec![None; documents.len()];
        let mut ready: BTreeMap<String, Option<PreparedObject>> = BTreeMap::new();
        let mut pending: Vec<(usize, ScriptDocument)> = Vec::new();
        let mut invocables: Vec<(usize, ScriptDocument)> = Vec::new();
        for (index, document) in documents.into_iter().enumerate() {
            match document.script.usage() {
                Usage::Service => pending.push((index, document)),
                Usage::Invocable => invocables.push((index, document)),
            }
        }

        while !pending.is_empty() {
            let (runnable, blocked): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|(_, document)| {
                    document
                        .script
                        .services()
                        .iter()
                        .all(|name| !service_ids.contains(name) || ready.contains_key(name))
                });

            if runnable.is_empty() {
                let ids: Vec<&str> = blocked
                    .iter()
                    .map(|(_, document)| document.script.id())
                    .collect();
                return Err(CoreError::Dependency(format!(
                    "Circular service dependencies between [{}]",
                    ids.join(", ")
                )));
            }

            for (index, document) in runnable {
                let id = document.script.id().to_string();
                let resolved = self.resolved_from(&document.script, &ready);
                let object = self
                    .prepare(document.script, document.source, &resolved)
                    .await?;
                ready.insert(id, Some(object.clone()));
                prepared[index] = Some(object);
            }
            pending = blocked;
        }

        for (index, document) in invocables {
            let object = self
                .prepare(document.script, document.source, &BTreeMap::new())
                .await?;
            prepared[index] = Some(object);
        }

        prepared
            .into_iter()
            .map(|object| {
                object.ok_or_else(|| CoreError::Internal("Batch entry left unprepared".to_string()))
            })
            .collect()
    }

    fn resolved_from(
        &self,
        script: &Script,
        ready: &BTreeMap<String, Option<PreparedObject>>,
    ) -> BTreeMap<String, Option<PreparedObject>> {
        script
            .services()
            .iter()
            .map(|name| (name.clone(), ready.get(name).cloned().flatten()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Converts between prepared objects and their persisted YAML text.
///
/// The forward direction is just the stored source. The reverse direction
/// parses and prepares; conversion failures carry the [`CoreError`] as their
/// source.
pub struct PreparedCodec {
    preparer: Arc<Preparer>,
}

impl PreparedCodec {
    pub fn new(preparer: Arc<Preparer>) -> Self {
        Self { preparer }
    }
}

#[async_trait]
impl Converter<PreparedObject, String> for PreparedCodec {
    async fn forward(&self, value: &PreparedObject) -> RegistryResult<String> {
        Ok(value.source().to_string())
    }

    async fn backward(&self, value: String) -> RegistryResult<PreparedObject> {
        let document = load_document(&value).map_err(RegistryError::conversion)?;
        self.preparer
            .prepare(document.script, document.source, &BTreeMap::new())
            .await
            .map_err(RegistryError::conversion)
    }

    async fn backward_all(&self, values: Vec<String>) -> RegistryResult<Vec<PreparedObject>> {
        let documents = values
            .iter()
            .map(|text| load_document(text))
            .collect::<Result<Vec<_>, _>>()
            .map_err(RegistryError::conversion)?;
        self.preparer
            .prepare_batch(documents)
            .await
            .map_err(RegistryError::conversion)
    }
}

/// Recover the [`CoreError`] a conversion failure wraps. Keys the store
/// cannot use are the caller's fault and read as validation errors.
pub(crate) fn from_registry(err: RegistryError) -> CoreError {
    match err {
        RegistryError::InvalidKey(message) => CoreError::Validation(message),
        RegistryError::Conversion(source) => match source.downcast::<CoreError>() {
            Ok(core) => *core,
            Err(other) => CoreError::Registry(RegistryError::Conversion(other)),
        },
        other => CoreError::Registry(other),
    }
}

/// Ids of the scripts among `objects` that declare `id` as a service.
pub(crate) fn dependants_of<'a>(
    id: &str,
    objects: impl IntoIterator<Item = &'a PreparedObject>,
) -> Vec<String> {
    let mut dependants: Vec<String> = objects
        .into_iter()
        .filter(|object| object.script().services().contains(id))
        .map(|object| object.script().id().to_string())
        .collect();
    dependants.sort();
    dependants
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
