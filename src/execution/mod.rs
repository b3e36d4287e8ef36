//! Sandboxed script execution.

pub mod docker_client;
pub mod executor;
pub mod resources;

pub use docker_client::{DockerClient, ExecOutput, SandboxContainerConfig};
pub use executor::{ExecutionRequest, ExecutionResult, SandboxExecutor, ScriptExecutor};
pub use resources::ExecutionLimits;
