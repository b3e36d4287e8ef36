//! Error types for scriptsmith subsystems.
//!
//! Each external surface the orchestrator touches gets its own error enum:
//! - LLM API interactions
//! - Prompt template rendering
//! - Sandbox execution (native and containerized)
//! - Web search and page fetching
//! - Configuration loading

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: SCRIPTSMITH_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Empty completion returned by model '{0}'")]
    EmptyCompletion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Whether a retry within a stage's budget is worthwhile.
    ///
    /// Client-side errors other than rate limiting indicate a malformed
    /// request that will fail identically on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_)
            | LlmError::ParseError(_)
            | LlmError::RateLimited(_)
            | LlmError::EmptyCompletion(_) => true,
            LlmError::ApiError { code, .. } => *code == 429 || *code >= 500,
            LlmError::MissingApiBase | LlmError::Io(_) => false,
        }
    }
}

/// Errors that can occur while rendering prompt templates.
///
/// Template failures are configuration defects; they are never retried.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Prompt template '{0}' not found")]
    NotFound(String),

    #[error("Failed to register prompt templates: {0}")]
    Registration(String),

    #[error("Failed to render template '{template}': {message}")]
    RenderFailed { template: String, message: String },
}

/// Errors that can occur during sandbox execution.
///
/// These describe infrastructure failures only. A generated script that
/// exits non-zero or times out produces an ordinary `ExecutionResult`,
/// not an `ExecutionError`.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Docker operation failed: {0}")]
    Docker(String),

    #[error("Container '{id}' not found")]
    ContainerNotFound { id: String },

    #[error("Failed to spawn '{command}': {message}")]
    SpawnFailed { command: String, message: String },

    #[error("No interpreter configured for language '{0}'")]
    UnsupportedLanguage(String),

    #[error("Isolated execution requested but no image was selected")]
    MissingImage,

    #[error("Failed to write script file '{path}': {message}")]
    ScriptWriteFailed { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during web search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Missing API key: TAVILY_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Search request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse search response: {0}")]
    ParseError(String),

    #[error("Failed to fetch page '{url}': {message}")]
    FetchFailed { url: String, message: String },
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
