//! LLM-backed synthesis stages.
//!
//! Each stage is a small agent owning one prompt and one parsing contract:
//! generation produces code, critique and diagnosis produce JSON verdicts,
//! routing produces an execution plan. Stages share the retry policy in
//! [`with_llm_retry`]: transient API failures and malformed responses are
//! retried inside the stage's budget, configuration defects are not.

pub mod critique;
pub mod diagnose;
pub mod generate;
pub mod router;

use std::future::Future;

use thiserror::Error;

use crate::error::{LlmError, PromptError, SearchError};

pub use critique::{CritiqueVerdict, ScriptCritic};
pub use diagnose::{DiagnosisVerdict, ExecutionDiagnostician};
pub use generate::{CodeGenerator, FeedbackContext, GenerateInput, GeneratedScript};
pub use router::{EnvRouter, RouteDecision};

/// Errors surfaced by a synthesis stage after its retry budget is spent.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Prompt rendering failed: {0}")]
    Prompt(#[from] PromptError),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Web search failed: {0}")]
    Search(#[from] SearchError),

    #[error("{stage} stage retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        stage: String,
        attempts: u32,
        last_error: Box<StageError>,
    },
}

impl StageError {
    fn is_retryable(&self) -> bool {
        match self {
            StageError::Llm(e) => e.is_transient(),
            StageError::Prompt(_) => false,
            StageError::MalformedResponse(_) => true,
            StageError::Search(e) => !matches!(e, SearchError::MissingApiKey),
            StageError::RetriesExhausted { .. } => false,
        }
    }
}

/// Runs a stage attempt up to `retries` times.
///
/// Retryable failures are logged and retried; a spent budget surfaces as
/// [`StageError::RetriesExhausted`] carrying the final attempt's error.
/// Non-retryable failures short-circuit.
pub(crate) async fn with_llm_retry<T, F, Fut>(
    stage: &str,
    retries: u32,
    mut attempt_fn: F,
) -> Result<T, StageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let retries = retries.max(1);
    let mut last_error = None;

    for attempt in 1..=retries {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                if attempt < retries {
                    tracing::warn!(stage, attempt, error = %e, "Stage attempt failed, retrying");
                }
                last_error = Some(e);
            }
        }
    }

    Err(StageError::RetriesExhausted {
        stage: stage.to_string(),
        attempts: retries,
        last_error: Box::new(last_error.unwrap_or(StageError::MalformedResponse(
            "retry budget was zero".to_string(),
        ))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_llm_retry("test", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StageError::MalformedResponse("not json".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_llm_retry("test", 2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StageError::MalformedResponse("still not json".into())) }
        })
        .await;

        match result {
            Err(StageError::RetriesExhausted {
                stage,
                attempts,
                last_error,
            }) => {
                assert_eq!(stage, "test");
                assert_eq!(attempts, 2);
                assert!(matches!(*last_error, StageError::MalformedResponse(_)));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_llm_retry("test", 5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StageError::Prompt(PromptError::NotFound(
                    "missing".to_string(),
                )))
            }
        })
        .await;

        assert!(matches!(result, Err(StageError::Prompt(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
