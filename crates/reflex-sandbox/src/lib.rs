//! Reflex Sandbox
//!
//! Executes untrusted Python source either inside a Docker container (via
//! bollard) or as a local child process.
//!
//! Both backends implement [`PythonRunner`] and report an [`ExecOutput`].
//! A non-zero exit is a normal result here; [`SandboxError`] is reserved for
//! failures of the sandbox itself.

pub mod docker;
pub mod manager;
pub mod process;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use docker::{DockerRunner, DockerSettings};
pub use manager::{ContainerManager, CreateContainerOptions};
pub use process::ProcessRunner;

/// Errors raised by the sandbox itself, as opposed to the code it runs.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Failed to create container.
    #[error("failed to create container: {0}")]
    CreateFailed(String),

    /// Failed to start container.
    #[error("failed to start container: {0}")]
    StartFailed(String),

    /// Failed to stop container.
    #[error("failed to stop container: {0}")]
    StopFailed(String),

    /// Failed to remove container.
    #[error("failed to remove container: {0}")]
    RemoveFailed(String),

    /// Failed to run a command inside a container.
    #[error("failed to execute in container: {0}")]
    ExecFailed(String),

    /// The image could not be found or pulled.
    #[error("image unavailable: {0}")]
    ImageUnavailable(String),

    /// Docker API error.
    #[error("docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    /// Invalid container state for the requested operation.
    #[error("invalid container state: expected {expected}, found {actual}")]
    InvalidState {
        /// The expected container state.
        expected: ContainerStatus,
        /// The actual container state.
        actual: ContainerStatus,
    },

    /// The interpreter process could not be spawned.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// The program that was launched.
        program: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// Status of a sandbox container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Container has been created but not started.
    #[default]
    Created,
    /// Container is currently running.
    Running,
    /// Container has been stopped.
    Stopped,
    /// Container no longer exists.
    Gone,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Gone => write!(f, "gone"),
        }
    }
}

/// A Docker container used as a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Unique identifier assigned by Docker.
    pub id: String,
    /// Human-readable name for the container.
    pub name: String,
    /// Docker image used to create this container.
    pub image: String,
    /// Current status of the container.
    pub status: ContainerStatus,
    /// Timestamp when the container was created.
    pub created_at: DateTime<Utc>,
}

impl Container {
    /// Creates a new container representation.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image: image.into(),
            status: ContainerStatus::default(),
            created_at: Utc::now(),
        }
    }

    /// Sets the container status.
    #[must_use]
    pub const fn with_status(mut self, status: ContainerStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns whether the container is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }

    /// Returns whether the container can be started.
    #[must_use]
    pub const fn can_start(&self) -> bool {
        matches!(self.status, ContainerStatus::Created | ContainerStatus::Stopped)
    }

    /// Returns whether the container can be stopped.
    #[must_use]
    pub const fn can_stop(&self) -> bool {
        matches!(self.status, ContainerStatus::Running)
    }
}

/// Captured result of one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i64>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Whether the execution was cut off by the timeout.
    pub timed_out: bool,
}

impl ExecOutput {
    /// Returns `true` if the process exited with status 0 within the timeout.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Describes why execution failed.
    ///
    /// For a Python traceback this is the final line, which names the raised
    /// exception (e.g. `ModuleNotFoundError: No module named 'foo'`).
    ///
    /// # Examples
    ///
    /// ```
    /// use reflex_sandbox::ExecOutput;
    ///
    /// let output = ExecOutput {
    ///     exit_code: Some(1),
    ///     stderr: "Traceback (most recent call last):\nZeroDivisionError: division by zero\n"
    ///         .to_string(),
    ///     ..Default::default()
    /// };
    /// assert_eq!(output.error_message(), "ZeroDivisionError: division by zero");
    /// ```
    #[must_use]
    pub fn error_message(&self) -> String {
        if self.timed_out {
            return "Execution timed out".to_string();
        }

        if let Some(line) = self.stderr.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
            return line.to_string();
        }

        match self.exit_code {
            Some(code) => format!("Process exited with status {code}"),
            None => "Process terminated without an exit status".to_string(),
        }
    }
}

/// Runs Python source text in isolation.
///
/// Each call gets a fresh interpreter, so no state leaks between runs.
#[async_trait]
pub trait PythonRunner: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Executes `source` and captures its output.
    async fn run(&self, source: &str) -> Result<ExecOutput, SandboxError>;

    /// Releases any resources held by the runner.
    async fn shutdown(&self) -> Result<(), SandboxError> {
        Ok(())
    }
}

/// Converts a timeout to whole seconds, rounding up and never below one.
pub(crate) fn timeout_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs();
    if timeout.subsec_nanos() > 0 || secs == 0 {
        secs + 1
    } else {
        secs
    }
}
