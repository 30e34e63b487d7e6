//! Unified execution interface and shared error type.
//!
//! An [`ExecutionBackend`] turns source text into something runnable for one
//! language. Backends that can pre-compile return an [`Executable`] from
//! [`ExecutionBackend::compile`]; the others return `None` and are driven
//! through [`ExecutionBackend::eval`] on every call. [`bind`] hides the
//! difference from the orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::sandbox::Sandbox;
use crate::value::{Namespace, Value};

/// Errors raised while compiling or running a script body.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Compilation failed: {0}")]
    Compile(String),

    #[error("Evaluation failed: {0}")]
    Runtime(String),

    /// The script exceeded its configured timeout and was killed.
    #[error("Script timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The script ran but exited with a non-zero exit code.
    #[error("Script failed with exit code {exit_code}: {stderr}")]
    ExecutionFailed { exit_code: i32, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A compiled script body, ready to run against any namespace.
#[async_trait]
pub trait Executable: Send + Sync {
    async fn run(&self, namespace: Namespace) -> Result<Value, BackendError>;

    /// Whether concurrent `run` calls on this handle are allowed.
    fn is_reentrant(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for dyn Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executable")
            .field("reentrant", &self.is_reentrant())
            .finish()
    }
}

/// Compile/eval capability for one language.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Primary language name, e.g. `expr`.
    fn name(&self) -> &str;

    /// Additional language names served by this backend.
    fn aliases(&self) -> &[&str] {
        &[]
    }

    /// Compile `source`, or return `None` when this backend only evaluates.
    fn compile(
        &self,
        source: &str,
        sandbox: &Arc<Sandbox>,
    ) -> Result<Option<Arc<dyn Executable>>, BackendError>;

    /// Evaluate `source` directly against `namespace`.
    async fn eval(
        &self,
        source: &str,
        namespace: Namespace,
        sandbox: &Arc<Sandbox>,
    ) -> Result<Value, BackendError>;

    /// Whether `eval` may run concurrently for the same source.
    fn is_reentrant(&self) -> bool {
        true
    }
}

/// Produce a runnable handle for `source`, compiling when the backend can.
///
/// Handles that are not reentrant are wrapped so calls on that handle are
/// serialized; other handles are unaffected.
pub fn bind(
    backend: Arc<dyn ExecutionBackend>,
    source: &str,
    sandbox: Arc<Sandbox>,
) -> Result<Arc<dyn Executable>, BackendError> {
    let executable: Arc<dyn Executable> = match backend.compile(source, &sandbox)? {
        Some(compiled) => compiled,
        None => Arc::new(Interpreted {
            backend,
            source: source.to_string(),
            sandbox,
        }),
    };

    if executable.is_reentrant() {
        Ok(executable)
    } else {
        Ok(Arc::new(Serialized {
            inner: executable,
            gate: Mutex::new(()),
        }))
    }
}

/// Eval-path handle for backends that do not compile.
struct Interpreted {
    backend: Arc<dyn ExecutionBackend>,
    source: String,
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Executable for Interpreted {
    async fn run(&self, namespace: Namespace) -> Result<Value, BackendError> {
        self.backend
            .eval(&self.source, namespace, &self.sandbox)
            .await
    }

    fn is_reentrant(&self) -> bool {
        self.backend.is_reentrant()
    }
}

/// Per-handle mutex around a non-reentrant executable.
struct Serialized {
    inner: Arc<dyn Executable>,
    gate: Mutex<()>,
}

#[async_trait]
impl Executable for Serialized {
    async fn run(&self, namespace: Namespace) -> Result<Value, BackendError> {
        let _turn = self.gate.lock().await;
        self.inner.run(namespace).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::scripting::test_helpers::host_sandbox;

    /// Records the highest number of overlapping `run` calls it has seen.
    struct Probe {
        reentrant: bool,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Probe {
        fn new(reentrant: bool) -> Arc<Self> {
            Arc::new(Self {
                reentrant,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Executable for Probe {
        async fn run(&self, _namespace: Namespace) -> Result<Value, BackendError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }

        fn is_reentrant(&self) -> bool {
            self.reentrant
        }
    }

    struct ProbeBackend {
        probe: Arc<Probe>,
    }

    #[async_trait]
    impl ExecutionBackend for ProbeBackend {
        fn name(&self) -> &str {
            "probe"
        }

        fn compile(
            &self,
            _source: &str,
            _sandbox: &Arc<Sandbox>,
        ) -> Result<Option<Arc<dyn Executable>>, BackendError> {
            Ok(Some(self.probe.clone() as Arc<dyn Executable>))
        }

        async fn eval(
            &self,
            _source: &str,
            _namespace: Namespace,
            _sandbox: &Arc<Sandbox>,
        ) -> Result<Value, BackendError> {
            Ok(Value::Null)
        }
    }

    /// Backend without a compile step that echoes its source.
    struct EchoBackend;

    #[async_trait]
    impl ExecutionBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        fn compile(
            &self,
            _source: &str,
            _sandbox: &Arc<Sandbox>,
        ) -> Result<Option<Arc<dyn Executable>>, BackendError> {
            Ok(None)
        }

        async fn eval(
            &self,
            source: &str,
            _namespace: Namespace,
            _sandbox: &Arc<Sandbox>,
        ) -> Result<Value, BackendError> {
            Ok(Value::from(source))
        }
    }

    async fn peak_with(reentrant: bool) -> usize {
        let probe = Probe::new(reentrant);
        let backend = Arc::new(ProbeBackend {
            probe: Arc::clone(&probe),
        });
        let executable = bind(backend, "", host_sandbox()).expect("bind");

        let mut handles = Vec::new();
        for _ in 0..4 {
            let executable = Arc::clone(&executable);
            handles.push(tokio::spawn(async move {
                executable.run(Namespace::new()).await.expect("run");
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }
        probe.peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn non_reentrant_handles_are_serialized() {
        assert_eq!(peak_with(false).await, 1);
    }

    #[tokio::test]
    async fn reentrant_handles_run_concurrently() {
        assert!(peak_with(true).await > 1);
    }

    #[tokio::test]
    async fn falls_back_to_eval_when_compile_is_unsupported() {
        let executable = bind(Arc::new(EchoBackend), "hello", host_sandbox()).expect("bind");
        let value = executable.run(Namespace::new()).await.expect("run");
        assert_eq!(value, Value::from("hello"));
    }

    #[test]
    fn display_execution_failed() {
        let err = BackendError::ExecutionFailed {
            exit_code: 42,
            stderr: "segfault".to_string(),
        };
        assert_eq!(err.to_string(), "Script failed with exit code 42: segfault");
    }
}
