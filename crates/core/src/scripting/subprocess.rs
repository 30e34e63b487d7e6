//! Subprocess plumbing shared by the shell and python backends.
//!
//! A backend builds a [`tokio::process::Command`] for its interpreter and
//! hands it to [`run_script`], which maps the namespace onto the child's
//! environment and stdin, enforces the timeout, and turns stdout back into a
//! [`Value`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::sandbox::Sandbox;
use crate::value::{Namespace, Value};

use super::backend::BackendError;

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Input for one child process.
#[derive(Debug, Clone)]
pub struct ProcessInput {
    /// JSON payload piped to the child's stdin.
    pub data: serde_json::Value,
    /// Additional environment variables set for the child process.
    pub env_vars: Vec<(String, String)>,
    /// Working directory for the child (current dir if `None`).
    pub working_directory: Option<PathBuf>,
    /// Maximum wall-clock time before the child is killed.
    pub timeout: Duration,
}

/// Captured output of one child process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    pub duration_ms: u64,
    /// Stdout parsed as JSON, or `None` if stdout is not valid JSON.
    pub parsed_output: Option<serde_json::Value>,
}

/// Run a script body through `cmd` against `namespace`.
///
/// Scalar namespace entries become environment variables, the data part of
/// the namespace is piped to stdin as a JSON object, and the sandbox search
/// path is prepended to `path_var`. A non-zero exit is an error; otherwise
/// stdout is returned as JSON when it parses, as trimmed text when it does
/// not, and as null when it is empty.
pub async fn run_script(
    cmd: &mut Command,
    namespace: &Namespace,
    sandbox: &Sandbox,
    path_var: &str,
    timeout: Duration,
) -> Result<Value, BackendError> {
    let mut env_vars = scalar_env(namespace);
    if let Some(joined) = search_path_value(sandbox, path_var) {
        env_vars.push((path_var.to_string(), joined));
    }

    let input = ProcessInput {
        data: namespace_data(namespace),
        env_vars,
        working_directory: None,
        timeout,
    };

    let output = run_command(cmd, input).await?;
    if output.exit_code != 0 {
        return Err(BackendError::ExecutionFailed {
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }

    Ok(match output.parsed_output {
        Some(json) => Value::from(json),
        None if output.stdout.trim().is_empty() => Value::Null,
        None => Value::Str(output.stdout.trim().to_string()),
    })
}

/// Spawn `cmd`, pipe JSON input to stdin, capture stdout/stderr, and enforce
/// the configured timeout.
pub async fn run_command(
    cmd: &mut Command,
    input: ProcessInput,
) -> Result<ProcessOutput, BackendError> {
    // `kill_on_drop(true)` kills the child when it is dropped on timeout.
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in &input.env_vars {
        cmd.env(key, value);
    }

    if let Some(dir) = &input.working_directory {
        cmd.current_dir(dir);
    }

    let start = Instant::now();

    let mut child = cmd.spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        let json_bytes = serde_json::to_vec(&input.data).unwrap_or_default();
        // The child may close stdin without reading it.
        let _ = stdin.write_all(&json_bytes).await;
        drop(stdin);
    }

    // Read both streams on their own tasks so `child.wait()` can borrow the child.
    let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    match tokio::time::timeout(input.timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();
            let stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
            let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();
            let parsed_output = serde_json::from_str(stdout.trim()).ok();

            Ok(ProcessOutput {
                stdout,
                stderr,
                exit_code: status.code().unwrap_or(-1),
                duration_ms,
                parsed_output,
            })
        }
        Ok(Err(e)) => Err(BackendError::Io(e)),
        Err(_elapsed) => Err(BackendError::Timeout {
            elapsed_ms: start.elapsed().as_millis() as u64,
        }),
    }
}

/// Read an entire output stream, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

/// Scalar entries whose names are usable as environment variable names.
fn scalar_env(namespace: &Namespace) -> Vec<(String, String)> {
    namespace
        .iter()
        .filter(|(name, _)| is_env_name(name))
        .filter_map(|(name, value)| match value {
            Value::Str(_) | Value::Int(_) | Value::Float(_) | Value::Bool(_) => {
                Some((name.clone(), value.render()))
            }
            _ => None,
        })
        .collect()
}

/// The serializable part of the namespace as one JSON object.
///
/// Entries holding functions (e.g. services exposing callables) have no data
/// form and are left out.
fn namespace_data(namespace: &Namespace) -> serde_json::Value {
    let entries = namespace
        .iter()
        .filter_map(|(name, value)| value.to_json().ok().map(|json| (name.clone(), json)))
        .collect();
    serde_json::Value::Object(entries)
}

/// `path_var` with the sandbox search path prepended, if there is any.
fn search_path_value(sandbox: &Sandbox, path_var: &str) -> Option<String> {
    let mut entries: Vec<PathBuf> = sandbox.search_path();
    if entries.is_empty() {
        return None;
    }
    if let Some(existing) = std::env::var_os(path_var) {
        entries.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(entries)
        .ok()
        .map(|joined| joined.to_string_lossy().into_owned())
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
