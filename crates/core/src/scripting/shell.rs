//! Shell backend.
//!
//! Runs the script body with `bash -c`. There is no compile step; every call
//! spawns a fresh process, so handles are reentrant.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::sandbox::Sandbox;
use crate::value::{Namespace, Value};

use super::backend::{BackendError, Executable, ExecutionBackend};
use super::subprocess;

pub struct ShellBackend {
    timeout: Duration,
}

impl ShellBackend {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ExecutionBackend for ShellBackend {
    fn name(&self) -> &str {
        "shell"
    }

    fn aliases(&self) -> &[&str] {
        &["bash"]
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
        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg("-c").arg(source);
        subprocess::run_script(&mut cmd, &namespace, sandbox, "PATH", self.timeout).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
