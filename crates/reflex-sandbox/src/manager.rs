//! Docker container manager for the Reflex sandbox.
//!
//! This module provides the [`ContainerManager`] struct for managing Docker
//! container lifecycle operations through the bollard crate.

use std::time::Duration;

use bollard::container::{
    Config as BollardConfig, CreateContainerOptions as BollardCreateOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info, instrument, warn};

use crate::{Container, ContainerStatus, ExecOutput, SandboxError};

/// Options for creating a new sandbox container.
///
/// # Example
///
/// ```no_run
/// use reflex_sandbox::CreateContainerOptions;
///
/// let options = CreateContainerOptions::new("reflex-run-1", "python:3.12-slim")
///     .with_env("PYTHONDONTWRITEBYTECODE", "1")
///     .with_cmd(vec!["sleep", "infinity"])
///     .with_network_disabled(true);
/// ```
#[derive(Debug, Clone)]
pub struct CreateContainerOptions {
    /// Human-readable name for the container.
    pub name: String,
    /// Docker image to use (e.g., "python:3.12-slim").
    pub image: String,
    /// Environment variables to set in the container.
    pub env: Option<Vec<String>>,
    /// Optional command to run instead of the image's default.
    pub cmd: Option<Vec<String>>,
    /// Whether the container gets no network access.
    pub network_disabled: bool,
}

impl CreateContainerOptions {
    /// Creates new container options with the specified name and image.
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: None,
            cmd: None,
            network_disabled: false,
        }
    }

    /// Adds an environment variable to the container options.
    ///
    /// Environment variables are passed as `KEY=VALUE` strings.
    #[must_use]
    pub fn with_env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let env_var = format!("{}={}", key.as_ref(), value.as_ref());
        match &mut self.env {
            Some(env) => env.push(env_var),
            None => self.env = Some(vec![env_var]),
        }
        self
    }

    /// Sets the command to run in the container.
    ///
    /// This overrides the image's default `CMD` instruction.
    #[must_use]
    pub fn with_cmd(mut self, cmd: Vec<impl Into<String>>) -> Self {
        self.cmd = Some(cmd.into_iter().map(Into::into).collect());
        self
    }

    /// Enables or disables networking for the container.
    #[must_use]
    pub const fn with_network_disabled(mut self, disabled: bool) -> Self {
        self.network_disabled = disabled;
        self
    }
}

/// Manages Docker container operations for the sandbox.
///
/// `ContainerManager` wraps a bollard [`Docker`] client and provides
/// high-level methods for container lifecycle management.
///
/// # Example
///
/// ```no_run
/// use reflex_sandbox::ContainerManager;
///
/// # async fn example() -> Result<(), reflex_sandbox::SandboxError> {
/// let manager = ContainerManager::new()?;
/// manager.health_check().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ContainerManager {
    /// The bollard Docker client instance.
    docker: Docker,
}

impl ContainerManager {
    /// Creates a new `ContainerManager` by connecting to the Docker daemon.
    ///
    /// Uses the default local connection method (Unix socket on Linux/macOS,
    /// named pipe on Windows).
    ///
    /// # Errors
    ///
    /// Returns a [`SandboxError::DockerApi`] if the connection fails.
    pub fn new() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        debug!("Connected to Docker daemon");
        Ok(Self { docker })
    }

    /// Returns a reference to the underlying Docker client.
    #[must_use]
    pub const fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Checks if the Docker daemon is reachable and healthy.
    ///
    /// # Errors
    ///
    /// Returns a [`SandboxError::DockerApi`] if the ping fails, which
    /// typically means the daemon is not running or not accessible.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), SandboxError> {
        self.docker.ping().await?;
        debug!("Docker daemon health check passed");
        Ok(())
    }

    /// Pulls `image` unless it is already present locally.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ImageUnavailable`] if the pull fails.
    #[instrument(skip(self))]
    pub async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!("Image already present");
            return Ok(());
        }

        info!("Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| SandboxError::ImageUnavailable(format!("{image}: {e}")))?;

        info!("Image pulled");
        Ok(())
    }

    /// Creates a new Docker container with the specified options.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::CreateFailed`] if the Docker API returns an
    /// error during container creation.
    #[instrument(skip(self), fields(name = %options.name, image = %options.image))]
    pub async fn create_container(
        &self,
        options: CreateContainerOptions,
    ) -> Result<Container, SandboxError> {
        let config = BollardConfig {
            image: Some(options.image.clone()),
            env: options.env.clone(),
            cmd: options.cmd.clone(),
            network_disabled: Some(options.network_disabled),
            host_config: Some(HostConfig::default()),
            ..Default::default()
        };

        let create_options = BollardCreateOptions {
            name: options.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| SandboxError::CreateFailed(e.to_string()))?;

        for warning in &response.warnings {
            warn!(
                container_id = %response.id,
                warning = %warning,
                "Docker warning during container creation"
            );
        }

        info!(
            container_id = %response.id,
            container_name = %options.name,
            "Container created"
        );

        Ok(Container::new(&response.id, &options.name, &options.image)
            .with_status(ContainerStatus::Created))
    }

    /// Starts a created or stopped container.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidState`] if the container cannot be
    /// started, or [`SandboxError::StartFailed`] if Docker rejects the request.
    #[instrument(skip(self, container), fields(container_id = %container.id))]
    pub async fn start_container(&self, container: &mut Container) -> Result<(), SandboxError> {
        if !container.can_start() {
            return Err(SandboxError::InvalidState {
                expected: ContainerStatus::Created,
                actual: container.status,
            });
        }

        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::StartFailed(e.to_string()))?;

        container.status = ContainerStatus::Running;
        debug!("Container started");
        Ok(())
    }

    /// Runs `cmd` inside a running container and captures its output.
    ///
    /// Output collection is abandoned after `timeout`; the result is then
    /// marked `timed_out`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidState`] if the container is not running,
    /// or [`SandboxError::ExecFailed`] if the exec cannot be created or inspected.
    #[instrument(skip(self, container, cmd), fields(container_id = %container.id))]
    pub async fn exec(
        &self,
        container: &Container,
        cmd: Vec<String>,
        timeout: Duration,
    ) -> Result<ExecOutput, SandboxError> {
        if !container.is_running() {
            return Err(SandboxError::InvalidState {
                expected: ContainerStatus::Running,
                actual: container.status,
            });
        }

        let exec = self
            .docker
            .create_exec(
                &container.id,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(cmd),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SandboxError::ExecFailed(e.to_string()))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::ExecFailed(e.to_string()))?;

        let mut output = ExecOutput::default();
        if let StartExecResults::Attached { output: mut stream, .. } = started {
            let collect = async {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) => {
                            output.stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            output.stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "Exec output stream failed");
                            break;
                        }
                    }
                }
            };

            if tokio::time::timeout(timeout, collect).await.is_err() {
                warn!(timeout_secs = timeout.as_secs(), "Exec timed out");
                output.timed_out = true;
                return Ok(output);
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SandboxError::ExecFailed(e.to_string()))?;
        output.exit_code = inspect.exit_code;

        debug!(exit_code = ?output.exit_code, "Exec finished");
        Ok(output)
    }

    /// Stops a running container.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::StopFailed`] if Docker rejects the request.
    #[instrument(skip(self, container), fields(container_id = %container.id))]
    pub async fn stop_container(&self, container: &mut Container) -> Result<(), SandboxError> {
        if !container.can_stop() {
            debug!(status = %container.status, "Container not running, nothing to stop");
            return Ok(());
        }

        self.docker
            .stop_container(&container.id, Some(StopContainerOptions { t: 5 }))
            .await
            .map_err(|e| SandboxError::StopFailed(e.to_string()))?;

        container.status = ContainerStatus::Stopped;
        debug!("Container stopped");
        Ok(())
    }

    /// Force-removes a container.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::RemoveFailed`] if Docker rejects the request.
    #[instrument(skip(self, container), fields(container_id = %container.id))]
    pub async fn remove_container(&self, container: &mut Container) -> Result<(), SandboxError> {
        self.docker
            .remove_container(
                &container.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SandboxError::RemoveFailed(e.to_string()))?;

        container.status = ContainerStatus::Gone;
        info!("Container removed");
        Ok(())
    }
}
