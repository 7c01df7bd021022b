//! Python execution as a local child process.
//!
//! No isolation beyond a separate interpreter; meant for development
//! machines without Docker.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::{ExecOutput, PythonRunner, SandboxError};

/// Runs `<interpreter> -c <source>` with a timeout.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: String,
    timeout: Duration,
}

impl ProcessRunner {
    /// Creates a runner for the given interpreter binary.
    #[must_use]
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    /// Returns the interpreter binary.
    #[must_use]
    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }
}

#[async_trait]
impl PythonRunner for ProcessRunner {
    fn name(&self) -> &str {
        "process"
    }

    #[instrument(skip_all, fields(interpreter = %self.interpreter, source_len = source.len()))]
    async fn run(&self, source: &str) -> Result<ExecOutput, SandboxError> {
        let child = Command::new(&self.interpreter)
            .arg("-c")
            .arg(source)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                program: self.interpreter.clone(),
                source,
            })?;

        // Dropping the child on timeout kills it.
        let Ok(result) = tokio::time::timeout(self.timeout, child.wait_with_output()).await else {
            warn!(timeout_secs = self.timeout.as_secs(), "Process timed out");
            return Ok(ExecOutput {
                timed_out: true,
                ..ExecOutput::default()
            });
        };

        let output = result.map_err(|source| SandboxError::Spawn {
            program: self.interpreter.clone(),
            source,
        })?;

        let exec = ExecOutput {
            exit_code: output.status.code().map(i64::from),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            timed_out: false,
        };
        debug!(exit_code = ?exec.exit_code, "Process finished");
        Ok(exec)
    }
}
