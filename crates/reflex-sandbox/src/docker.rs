//! Python execution inside a long-lived Docker container.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::manager::{ContainerManager, CreateContainerOptions};
use crate::{timeout_secs, Container, ExecOutput, PythonRunner, SandboxError};

/// Exit status reported by coreutils `timeout -s KILL` when it fires.
const KILLED_BY_TIMEOUT: i64 = 137;

/// Stop and remove steps of a container's teardown.
#[async_trait]
trait ContainerLifecycle: Send + Sync {
    async fn stop(&self, container: &mut Container) -> Result<(), SandboxError>;
    async fn remove(&self, container: &mut Container) -> Result<(), SandboxError>;
}

#[async_trait]
impl ContainerLifecycle for ContainerManager {
    async fn stop(&self, container: &mut Container) -> Result<(), SandboxError> {
        self.stop_container(container).await
    }

    async fn remove(&self, container: &mut Container) -> Result<(), SandboxError> {
        self.remove_container(container).await
    }
}

/// Stops then force-removes `container`.
///
/// A failed stop is logged and the removal still runs.
async fn teardown<L>(lifecycle: &L, container: &mut Container) -> Result<(), SandboxError>
where
    L: ContainerLifecycle + ?Sized,
{
    if let Err(e) = lifecycle.stop(container).await {
        warn!(
            container_id = %container.id,
            error = %e,
            "Failed to stop sandbox container, forcing removal"
        );
    }
    lifecycle.remove(container).await
}

/// Settings for [`DockerRunner`].
#[derive(Debug, Clone)]
pub struct DockerSettings {
    /// Image the container is created from.
    pub image: String,
    /// Interpreter binary inside the image.
    pub interpreter: String,
    /// Limit for each execution.
    pub timeout: Duration,
    /// Whether the container gets no network access.
    pub network_disabled: bool,
    /// Whether the container survives [`PythonRunner::shutdown`].
    pub keep_container: bool,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            image: "python:3.12-slim".to_string(),
            interpreter: "python3".to_string(),
            timeout: Duration::from_secs(30),
            network_disabled: true,
            keep_container: false,
        }
    }
}

/// Runs each program as a fresh interpreter inside one shared container.
///
/// The container is created on first use and kept running (`sleep infinity`)
/// until [`PythonRunner::shutdown`].
#[derive(Debug)]
pub struct DockerRunner {
    manager: ContainerManager,
    settings: DockerSettings,
    container: Mutex<Option<Container>>,
}

impl DockerRunner {
    /// Connects to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::DockerApi`] if the daemon cannot be reached.
    pub fn new(settings: DockerSettings) -> Result<Self, SandboxError> {
        Ok(Self::with_manager(ContainerManager::new()?, settings))
    }

    /// Creates a runner over an existing manager.
    #[must_use]
    pub fn with_manager(manager: ContainerManager, settings: DockerSettings) -> Self {
        Self {
            manager,
            settings,
            container: Mutex::new(None),
        }
    }

    /// Returns the settings.
    #[must_use]
    pub const fn settings(&self) -> &DockerSettings {
        &self.settings
    }

    /// Checks the daemon, pulls the image, and starts the container.
    ///
    /// Called lazily by [`PythonRunner::run`]; calling it up front surfaces
    /// Docker problems before a run starts.
    ///
    /// # Errors
    ///
    /// Returns the first lifecycle error encountered.
    #[instrument(skip(self), fields(image = %self.settings.image))]
    pub async fn prepare(&self) -> Result<(), SandboxError> {
        let mut slot = self.container.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        self.manager.health_check().await?;
        self.manager.ensure_image(&self.settings.image).await?;

        let name = format!("reflex-sandbox-{}", uuid::Uuid::new_v4().simple());
        let options = CreateContainerOptions::new(name, &self.settings.image)
            .with_env("PYTHONDONTWRITEBYTECODE", "1")
            .with_cmd(vec!["sleep", "infinity"])
            .with_network_disabled(self.settings.network_disabled);

        let mut container = self.manager.create_container(options).await?;
        if let Err(e) = self.manager.start_container(&mut container).await {
            if let Err(cleanup) = self.manager.remove_container(&mut container).await {
                warn!(error = %cleanup, "Failed to remove container after start failure");
            }
            return Err(e);
        }

        info!(container_id = %container.id, "Sandbox container ready");
        *slot = Some(container);
        Ok(())
    }

    /// Builds the exec command for `source`.
    fn command(&self, source: &str) -> Vec<String> {
        vec![
            "timeout".to_string(),
            "-s".to_string(),
            "KILL".to_string(),
            timeout_secs(self.settings.timeout).to_string(),
            self.settings.interpreter.clone(),
            "-c".to_string(),
            source.to_string(),
        ]
    }
}

#[async_trait]
impl PythonRunner for DockerRunner {
    fn name(&self) -> &str {
        "docker"
    }

    async fn run(&self, source: &str) -> Result<ExecOutput, SandboxError> {
        self.prepare().await?;

        let slot = self.container.lock().await;
        let Some(container) = slot.as_ref() else {
            return Err(SandboxError::ExecFailed(
                "sandbox container is not available".to_string(),
            ));
        };

        // Grace period lets the in-container timeout fire first.
        let limit = self.settings.timeout + Duration::from_secs(2);
        let mut output = self.manager.exec(container, self.command(source), limit).await?;
        if output.exit_code == Some(KILLED_BY_TIMEOUT) {
            output.timed_out = true;
        }
        Ok(output)
    }

    #[instrument(skip(self))]
    async fn shutdown(&self) -> Result<(), SandboxError> {
        let mut slot = self.container.lock().await;
        let Some(mut container) = slot.take() else {
            return Ok(());
        };

        if self.settings.keep_container {
            info!(container_id = %container.id, "Keeping sandbox container");
            return Ok(());
        }

        teardown(&self.manager, &mut container).await
    }
}
