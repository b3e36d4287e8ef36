//! Docker API wrapper for isolated script execution.
//!
//! Built on the bollard crate. Containers started here are long-lived
//! sandboxes: they are created with a keep-alive command, the task work
//! directory bind-mounted, and scripts are run inside via exec so one
//! container can serve every execution attempt of a run.

use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;

use crate::error::ExecutionError;
use crate::execution::resources::ExecutionLimits;

/// Configuration for a sandbox container.
#[derive(Debug, Clone)]
pub struct SandboxContainerConfig {
    /// Unique container name.
    pub name: String,
    /// Docker image to use.
    pub image: String,
    /// Host work directory bind-mounted at `/workspace`.
    pub work_dir: String,
    /// Resource limits for the container.
    pub limits: ExecutionLimits,
    /// Network mode ("bridge" by default so scripts can install packages).
    pub network_mode: String,
}

impl SandboxContainerConfig {
    /// Creates a sandbox configuration for the given image and work directory.
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        work_dir: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            work_dir: work_dir.into(),
            limits: ExecutionLimits::default(),
            network_mode: "bridge".to_string(),
        }
    }

    /// Sets explicit resource limits.
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the network mode.
    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = mode.into();
        self
    }
}

/// Output of a command executed inside a sandbox container.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Exit code of the command.
    pub exit_code: i64,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// Docker client wrapper for sandbox lifecycle operations.
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connects to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::DaemonUnavailable` if the daemon is not accessible.
    pub fn new() -> Result<Self, ExecutionError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ExecutionError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Creates and starts a long-lived sandbox container.
    ///
    /// The image is pulled first when absent locally. The container runs a
    /// keep-alive sleep so scripts can be exec'd into it repeatedly.
    ///
    /// # Returns
    ///
    /// The container ID.
    pub async fn start_sandbox(
        &self,
        config: &SandboxContainerConfig,
    ) -> Result<String, ExecutionError> {
        if !self.image_exists(&config.image).await {
            self.pull_image(&config.image).await?;
        }

        let host_config = HostConfig {
            memory: Some(config.limits.memory_bytes()),
            cpu_period: Some(config.limits.cpu_period()),
            cpu_quota: Some(config.limits.cpu_quota()),
            pids_limit: Some(config.limits.max_processes as i64),
            network_mode: Some(config.network_mode.clone()),
            binds: Some(vec![format!("{}:/workspace", config.work_dir)]),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: Some(vec![
                "sleep".to_string(),
                "infinity".to_string(),
            ]),
            working_dir: Some("/workspace".to_string()),
            host_config: Some(host_config),
            tty: Some(true),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| ExecutionError::Docker(format!("Failed to create container: {e}")))?;

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ExecutionError::Docker(format!("Failed to start container: {e}")))?;

        Ok(response.id)
    }

    /// Executes a command inside a running sandbox container.
    pub async fn exec_command(
        &self,
        id: &str,
        cmd: &[String],
    ) -> Result<ExecOutput, ExecutionError> {
        let exec_options = CreateExecOptions {
            cmd: Some(cmd.iter().map(String::as_str).collect()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            working_dir: Some("/workspace"),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_options)
            .await
            .map_err(|e| ExecutionError::Docker(format!("Failed to create exec: {e}")))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| ExecutionError::Docker(format!("Failed to start exec: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(ExecutionError::Docker(format!(
                            "Error reading exec output: {e}"
                        )));
                    }
                }
            }
        }

        let exec_info = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| ExecutionError::Docker(format!("Failed to inspect exec: {e}")))?;

        let exit_code = exec_info.exit_code.unwrap_or(-1);

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    /// Stops and removes a sandbox container.
    ///
    /// Removal is forced, so a hung container cannot block teardown.
    pub async fn remove_sandbox(&self, id: &str) -> Result<(), ExecutionError> {
        let stop_options = StopContainerOptions { t: 10 };
        if let Err(e) = self.docker.stop_container(id, Some(stop_options)).await {
            tracing::warn!(container = id, error = %e, "Failed to stop container gracefully");
        }

        let remove_options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(id, Some(remove_options))
            .await
            .map_err(|e| {
                if e.to_string().contains("No such container") {
                    ExecutionError::ContainerNotFound { id: id.to_string() }
                } else {
                    ExecutionError::Docker(format!("Failed to remove container: {e}"))
                }
            })?;

        Ok(())
    }

    /// Pulls a Docker image from a registry.
    pub async fn pull_image(&self, image: &str) -> Result<(), ExecutionError> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            result.map_err(|e| ExecutionError::Docker(format!("Failed to pull image: {e}")))?;
        }

        Ok(())
    }

    /// Checks if an image exists locally.
    pub async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_config_builder() {
        let config = SandboxContainerConfig::new("run-1", "python:3.11-slim", "/tmp/task")
            .with_limits(ExecutionLimits::new(4096, 4.0, 500))
            .with_network_mode("none");

        assert_eq!(config.name, "run-1");
        assert_eq!(config.image, "python:3.11-slim");
        assert_eq!(config.work_dir, "/tmp/task");
        assert_eq!(config.limits.memory_mb, 4096);
        assert_eq!(config.network_mode, "none");
    }

    #[test]
    fn test_exec_output() {
        let output = ExecOutput {
            exit_code: 0,
            stdout: "done".to_string(),
            stderr: String::new(),
        };
        assert_eq!(output.exit_code, 0);
        assert!(output.stderr.is_empty());
    }
}
