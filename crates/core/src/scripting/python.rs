//! Python backend.
//!
//! Runs the script body with `<python> -c`, prepending the sandbox search
//! path to `PYTHONPATH` so private modules shadow installed ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::sandbox::Sandbox;
use crate::value::{Namespace, Value};

use super::backend::{BackendError, Executable, ExecutionBackend};
use super::subprocess;

pub struct PythonBackend {
    /// Interpreter binary, e.g. `python3`.
    python_bin: String,
    timeout: Duration,
}

impl PythonBackend {
    pub fn new(python_bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python_bin: python_bin.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ExecutionBackend for PythonBackend {
    fn name(&self) -> &str {
        "python"
    }

    fn aliases(&self) -> &[&str] {
        &["python3"]
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
        namespace: Namespace,
        sandbox: &Arc<Sandbox>,
    ) -> Result<Value, BackendError> {
        let mut cmd = tokio::process::Command::new(&self.python_bin);
        cmd.arg("-c").arg(source);
        subprocess::run_script(&mut cmd, &namespace, sandbox, "PYTHONPATH", self.timeout).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
