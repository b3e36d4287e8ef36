//! Script execution against native interpreters and Docker sandboxes.
//!
//! The executor separates two failure planes. A script that runs and fails
//! (non-zero exit, stderr, timeout) produces an `ExecutionResult` and stays
//! inside the repair loop. Infrastructure failures (no daemon, unknown
//! interpreter, spawn errors) are `ExecutionError` and abort the run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::environment::EnvProfile;
use crate::error::ExecutionError;
use crate::execution::docker_client::{DockerClient, SandboxContainerConfig};
use crate::execution::resources::ExecutionLimits;

/// A fully routed request to run one script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Script source to run.
    pub code: String,
    /// Language the script is written in, lowercased.
    pub language: String,
    /// Shell command that runs the script file, when the language cannot be
    /// piped to an interpreter directly.
    pub command: Option<String>,
    /// File name the script is written to before `command` runs.
    pub script_file: Option<String>,
    /// Run inside a container instead of a native interpreter.
    pub isolated: bool,
    /// Container image for isolated runs.
    pub image: Option<String>,
}

/// Outcome of one script run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured stdout.
    pub output: String,
    /// Captured stderr or a timeout notice, when present.
    pub error: Option<String>,
    /// Whether the process exited with status zero.
    pub exit_ok: bool,
}

impl ExecutionResult {
    /// Renders the result as prompt text for the diagnosis stage.
    pub fn report(&self) -> String {
        let mut text = format!("## Execution output\n{}", self.output);
        if let Some(error) = &self.error {
            text.push_str("\n\n## Execution error message\n");
            text.push_str(error);
        }
        text
    }

    fn timed_out(limit: Duration) -> Self {
        Self {
            output: String::new(),
            error: Some(format!(
                "Execution timed out after {} seconds and was terminated",
                limit.as_secs()
            )),
            exit_ok: false,
        }
    }
}

/// Runs routed scripts and owns the sandbox lifecycle.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Executes one script to completion or timeout.
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutionError>;

    /// Releases every sandbox this executor created. Safe to call more than once.
    async fn teardown(&self) -> Result<(), ExecutionError>;
}

/// Production executor: native interpreters plus reusable Docker sandboxes.
///
/// Containers are created lazily per image and reused for every execution of
/// the run, so repeated repair attempts do not pay container startup again.
pub struct SandboxExecutor {
    profile: EnvProfile,
    work_dir: PathBuf,
    native_timeout: Duration,
    container_timeout: Duration,
    limits: ExecutionLimits,
    run_id: String,
    docker: Mutex<Option<DockerClient>>,
    // image -> container id, for sandbox reuse across attempts
    containers: Mutex<HashMap<String, String>>,
}

impl SandboxExecutor {
    /// Creates an executor for the given environment profile and work directory.
    pub fn new(
        profile: EnvProfile,
        work_dir: impl Into<PathBuf>,
        native_timeout: Duration,
        container_timeout: Duration,
    ) -> Self {
        Self {
            profile,
            work_dir: work_dir.into(),
            native_timeout,
            container_timeout,
            limits: ExecutionLimits::default(),
            run_id: Uuid::new_v4().to_string()[..8].to_string(),
            docker: Mutex::new(None),
            containers: Mutex::new(HashMap::new()),
        }
    }

    /// Sets resource limits for isolated runs.
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    fn write_script_file(&self, name: &str, code: &str) -> Result<PathBuf, ExecutionError> {
        let path = self.work_dir.join(name);
        std::fs::write(&path, code).map_err(|e| ExecutionError::ScriptWriteFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(path)
    }

    async fn run_native(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, ExecutionError> {
        let (program, args) = match (&request.command, &request.script_file) {
            (Some(command), Some(script_file)) => {
                self.write_script_file(script_file, &request.code)?;
                ("bash".to_string(), vec!["-c".to_string(), command.clone()])
            }
            _ => {
                let invocation = self
                    .profile
                    .native_invocation(&request.language)
                    .ok_or_else(|| {
                        ExecutionError::UnsupportedLanguage(request.language.clone())
                    })?;
                let program = invocation[0].clone();
                let mut args: Vec<String> = invocation[1..].to_vec();
                args.push(request.code.clone());
                (program, args)
            }
        };

        let mut child = tokio::process::Command::new(&program)
            .args(&args)
            .current_dir(&self.work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed {
                command: program.clone(),
                message: e.to_string(),
            })?;

        match tokio::time::timeout(self.native_timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output.map_err(|e| ExecutionError::SpawnFailed {
                    command: program,
                    message: e.to_string(),
                })?;
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                Ok(ExecutionResult {
                    output: String::from_utf8_lossy(&output.stdout).to_string(),
                    error: if stderr.is_empty() { None } else { Some(stderr) },
                    exit_ok: output.status.success(),
                })
            }
            Err(_) => Ok(ExecutionResult::timed_out(self.native_timeout)),
        }
    }

    async fn ensure_container(&self, image: &str) -> Result<String, ExecutionError> {
        let mut containers = self.containers.lock().await;
        if let Some(id) = containers.get(image) {
            return Ok(id.clone());
        }

        let mut docker_guard = self.docker.lock().await;
        if docker_guard.is_none() {
            *docker_guard = Some(DockerClient::new()?);
        }
        let docker = docker_guard.as_ref().unwrap();

        let name = format!(
            "scriptsmith-{}-{}",
            self.run_id,
            image.replace(['/', ':', '.'], "-")
        );
        let config = SandboxContainerConfig::new(
            name,
            image,
            self.work_dir.display().to_string(),
        )
        .with_limits(self.limits.clone());

        tracing::info!(image, "Starting sandbox container");
        let id = docker.start_sandbox(&config).await?;
        containers.insert(image.to_string(), id.clone());
        Ok(id)
    }

    async fn run_isolated(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, ExecutionError> {
        let image = request
            .image
            .as_deref()
            .ok_or(ExecutionError::MissingImage)?;
        let container_id = self.ensure_container(image).await?;

        let cmd = match (&request.command, &request.script_file) {
            (Some(command), Some(script_file)) => {
                self.write_script_file(script_file, &request.code)?;
                vec!["bash".to_string(), "-c".to_string(), command.clone()]
            }
            _ => {
                let invocation = self
                    .profile
                    .native_invocation(&request.language)
                    .ok_or_else(|| {
                        ExecutionError::UnsupportedLanguage(request.language.clone())
                    })?;
                let mut cmd: Vec<String> = invocation.to_vec();
                cmd.push(request.code.clone());
                cmd
            }
        };

        let docker_guard = self.docker.lock().await;
        let docker = docker_guard
            .as_ref()
            .ok_or_else(|| ExecutionError::Docker("Client not initialized".to_string()))?;

        match tokio::time::timeout(
            self.container_timeout,
            docker.exec_command(&container_id, &cmd),
        )
        .await
        {
            Ok(result) => {
                let output = result?;
                let stderr = output.stderr.trim().to_string();
                Ok(ExecutionResult {
                    output: output.stdout,
                    error: if stderr.is_empty() { None } else { Some(stderr) },
                    exit_ok: output.exit_code == 0,
                })
            }
            Err(_) => Ok(ExecutionResult::timed_out(self.container_timeout)),
        }
    }
}

#[async_trait]
impl ScriptExecutor for SandboxExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
        if request.isolated {
            self.run_isolated(request).await
        } else {
            self.run_native(request).await
        }
    }

    async fn teardown(&self) -> Result<(), ExecutionError> {
        let mut containers = self.containers.lock().await;
        if containers.is_empty() {
            return Ok(());
        }

        let docker_guard = self.docker.lock().await;
        if let Some(docker) = docker_guard.as_ref() {
            for (image, id) in containers.drain() {
                tracing::info!(image, container = %id, "Removing sandbox container");
                if let Err(e) = docker.remove_sandbox(&id).await {
                    tracing::warn!(container = %id, error = %e, "Failed to remove sandbox");
                }
            }
        }
        Ok(())
    }
}

impl SandboxExecutor {
    /// The directory script files are written into.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}
