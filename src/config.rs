//! Configuration for synthesis runs.
//!
//! Provides [`SynthesisConfig`] with budgets and timeouts for the engine,
//! the sandbox executor, and the research sub-pipeline. Values come from
//! defaults, a YAML file, or `SCRIPTSMITH_*` environment variables, in
//! that order of precedence.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Budgets and limits for one synthesis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    // Cycle-level budgets
    /// Maximum number of generation attempts per run.
    pub max_iterations: u32,
    /// Maximum consecutive critique rejections before forcing execution.
    pub max_critique_iterations: u32,
    /// Maximum repair-mode generations per run.
    pub max_repair_attempts: u32,

    // Call-level budgets
    /// Retry budget for each LLM-backed stage call.
    pub llm_retries: u32,

    // Executor settings
    /// Wall-clock timeout for native script execution in seconds.
    pub native_timeout_secs: u64,
    /// Wall-clock timeout for containerized script execution in seconds.
    pub container_timeout_secs: u64,

    // LLM settings
    /// Model used for chat-style stages (critique, diagnosis, routing).
    pub chat_model: String,
    /// Model used for code generation and repair.
    pub code_model: String,
    /// Temperature for code generation.
    pub code_temperature: f64,

    // Research settings
    /// Maximum query-regeneration rounds when filtering yields nothing.
    pub max_query_rounds: u32,
    /// Maximum results requested per search query.
    pub search_max_results: usize,
    /// Maximum filtered pages fetched in full.
    pub max_fetched_pages: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            max_critique_iterations: 3,
            max_repair_attempts: 4,
            llm_retries: 3,
            native_timeout_secs: 30,
            container_timeout_secs: 60,
            chat_model: "anthropic/claude-sonnet-4".to_string(),
            code_model: "anthropic/claude-sonnet-4".to_string(),
            code_temperature: 0.3,
            max_query_rounds: 3,
            search_max_results: 7,
            max_fetched_pages: 5,
        }
    }
}

impl SynthesisConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SCRIPTSMITH_MAX_ITERATIONS`: generation attempts per run (default: 6)
    /// - `SCRIPTSMITH_MAX_CRITIQUE_ITERATIONS`: critique rounds before forced execution (default: 3)
    /// - `SCRIPTSMITH_MAX_REPAIR_ATTEMPTS`: repair generations per run (default: 4)
    /// - `SCRIPTSMITH_LLM_RETRIES`: per-stage LLM retry budget (default: 3)
    /// - `SCRIPTSMITH_NATIVE_TIMEOUT_SECS`: native execution timeout (default: 30)
    /// - `SCRIPTSMITH_CONTAINER_TIMEOUT_SECS`: container execution timeout (default: 60)
    /// - `SCRIPTSMITH_CHAT_MODEL`: chat-stage model
    /// - `SCRIPTSMITH_CODE_MODEL`: code-generation model
    /// - `SCRIPTSMITH_CODE_TEMPERATURE`: code-generation temperature (default: 0.3)
    /// - `SCRIPTSMITH_MAX_QUERY_ROUNDS`: research query regeneration rounds (default: 3)
    /// - `SCRIPTSMITH_SEARCH_MAX_RESULTS`: results per search query (default: 7)
    /// - `SCRIPTSMITH_MAX_FETCHED_PAGES`: full pages fetched per research run (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SCRIPTSMITH_MAX_ITERATIONS") {
            config.max_iterations = parse_env_value(&val, "SCRIPTSMITH_MAX_ITERATIONS")?;
        }
        if let Ok(val) = std::env::var("SCRIPTSMITH_MAX_CRITIQUE_ITERATIONS") {
            config.max_critique_iterations =
                parse_env_value(&val, "SCRIPTSMITH_MAX_CRITIQUE_ITERATIONS")?;
        }
        if let Ok(val) = std::env::var("SCRIPTSMITH_MAX_REPAIR_ATTEMPTS") {
            config.max_repair_attempts = parse_env_value(&val, "SCRIPTSMITH_MAX_REPAIR_ATTEMPTS")?;
        }
        if let Ok(val) = std::env::var("SCRIPTSMITH_LLM_RETRIES") {
            config.llm_retries = parse_env_value(&val, "SCRIPTSMITH_LLM_RETRIES")?;
        }
        if let Ok(val) = std::env::var("SCRIPTSMITH_NATIVE_TIMEOUT_SECS") {
            config.native_timeout_secs = parse_env_value(&val, "SCRIPTSMITH_NATIVE_TIMEOUT_SECS")?;
        }
        if let Ok(val) = std::env::var("SCRIPTSMITH_CONTAINER_TIMEOUT_SECS") {
            config.container_timeout_secs =
                parse_env_value(&val, "SCRIPTSMITH_CONTAINER_TIMEOUT_SECS")?;
        }
        if let Ok(val) = std::env::var("SCRIPTSMITH_CHAT_MODEL") {
            config.chat_model = val;
        }
        if let Ok(val) = std::env::var("SCRIPTSMITH_CODE_MODEL") {
            config.code_model = val;
        }
        if let Ok(val) = std::env::var("SCRIPTSMITH_CODE_TEMPERATURE") {
            config.code_temperature = parse_env_value(&val, "SCRIPTSMITH_CODE_TEMPERATURE")?;
        }
        if let Ok(val) = std::env::var("SCRIPTSMITH_MAX_QUERY_ROUNDS") {
            config.max_query_rounds = parse_env_value(&val, "SCRIPTSMITH_MAX_QUERY_ROUNDS")?;
        }
        if let Ok(val) = std::env::var("SCRIPTSMITH_SEARCH_MAX_RESULTS") {
            config.search_max_results = parse_env_value(&val, "SCRIPTSMITH_SEARCH_MAX_RESULTS")?;
        }
        if let Ok(val) = std::env::var("SCRIPTSMITH_MAX_FETCHED_PAGES") {
            config.max_fetched_pages = parse_env_value(&val, "SCRIPTSMITH_MAX_FETCHED_PAGES")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.max_critique_iterations == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_critique_iterations must be at least 1".to_string(),
            ));
        }
        if self.llm_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "llm_retries must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.code_temperature) {
            return Err(ConfigError::ValidationFailed(format!(
                "code_temperature must be in [0.0, 2.0], got {}",
                self.code_temperature
            )));
        }
        if self.native_timeout_secs == 0 || self.container_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "execution timeouts must be non-zero".to_string(),
            ));
        }
        if self.max_query_rounds == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_query_rounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Native execution timeout as a [`Duration`].
    pub fn native_timeout(&self) -> Duration {
        Duration::from_secs(self.native_timeout_secs)
    }

    /// Container execution timeout as a [`Duration`].
    pub fn container_timeout(&self) -> Duration {
        Duration::from_secs(self.container_timeout_secs)
    }
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{}", e),
    })
}
