//! scriptsmith: iterative script synthesis with sandboxed execution.
//!
//! Given a natural-language task and a data directory, the engine generates
//! a candidate script with an LLM, reviews it, runs it in a sandbox (native
//! interpreter or Docker container), diagnoses failures and repairs the code
//! until it succeeds or its budgets run out. Execution failures optionally
//! trigger a web research sub-pipeline whose findings feed the repair prompt.

pub mod cli;
pub mod config;
pub mod engine;
pub mod environment;
pub mod error;
pub mod execution;
pub mod llm;
pub mod prompts;
pub mod research;
pub mod stages;
pub mod utils;

// Re-export the types most callers need
pub use config::SynthesisConfig;
pub use engine::{Outcome, RunFailure, RunReport, SynthesisEngine, TaskContext};
pub use error::{ConfigError, ExecutionError, LlmError, PromptError, SearchError};
pub use stages::StageError;
