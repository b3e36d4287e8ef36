//! Execution outcome diagnosis stage.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tera::Context;

use crate::config::SynthesisConfig;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::prompts::{PromptLibrary, DIAGNOSE_SYSTEM};
use crate::stages::{with_llm_retry, StageError};
use crate::utils::extract_json;

/// Three-way classification of an execution outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisVerdict {
    /// The execution failed to accomplish the script's work.
    pub error_occurred: bool,
    /// A web search for the error would plausibly help.
    #[serde(default)]
    pub need_web_search: bool,
    /// Root-cause summary quoting the decisive output, empty on success.
    #[serde(default)]
    pub error_summary: String,
}

/// Stage agent classifying execution reports.
///
/// Exit status alone is not trusted: scripts can exit zero after silently
/// doing nothing, or exit non-zero on a warning. The model reads the full
/// report and decides.
pub struct ExecutionDiagnostician {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<PromptLibrary>,
    model: String,
    retries: u32,
}

impl ExecutionDiagnostician {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<PromptLibrary>,
        config: &SynthesisConfig,
    ) -> Self {
        Self {
            provider,
            prompts,
            model: config.chat_model.clone(),
            retries: config.llm_retries,
        }
    }

    /// Classifies one execution report.
    pub async fn diagnose(&self, execution_report: &str) -> Result<DiagnosisVerdict, StageError> {
        let mut context = Context::new();
        context.insert("execution_output", execution_report);
        let user = self.prompts.render("diagnose.user", &context)?;

        with_llm_retry("diagnose", self.retries, || {
            let request = GenerationRequest::new(
                self.model.clone(),
                vec![
                    Message::system(DIAGNOSE_SYSTEM),
                    Message::user(user.clone()),
                ],
            );

            async move {
                let response = self.provider.generate(request).await?;
                let content = response
                    .first_content()
                    .ok_or_else(|| StageError::MalformedResponse("empty completion".into()))?;

                let json = extract_json(content)
                    .into_result(content)
                    .map_err(StageError::MalformedResponse)?;

                serde_json::from_str(&json).map_err(|e| {
                    StageError::MalformedResponse(format!("invalid diagnosis verdict: {e}"))
                })
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmProvider;

    fn diagnostician(provider: Arc<MockLlmProvider>) -> ExecutionDiagnostician {
        ExecutionDiagnostician::new(
            provider,
            Arc::new(PromptLibrary::builtin().expect("library")),
            &SynthesisConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_clean_run() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.push_response(
            r#"{"error_occurred": false, "need_web_search": false, "error_summary": ""}"#,
        );

        let verdict = diagnostician(provider)
            .diagnose("## Execution output\nrows written: 500")
            .await
            .expect("diagnose");

        assert!(!verdict.error_occurred);
        assert!(!verdict.need_web_search);
    }

    #[tokio::test]
    async fn test_failure_needing_research() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.push_response(
            r#"{"error_occurred": true, "need_web_search": true, "error_summary": "AnnData concatenation fails with incompatible var names"}"#,
        );

        let verdict = diagnostician(provider)
            .diagnose("## Execution error message\nValueError: var names mismatch")
            .await
            .expect("diagnose");

        assert!(verdict.error_occurred);
        assert!(verdict.need_web_search);
        assert!(verdict.error_summary.contains("AnnData"));
    }

    #[tokio::test]
    async fn test_report_reaches_prompt() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.push_response(
            r#"{"error_occurred": false, "need_web_search": false, "error_summary": ""}"#,
        );

        diagnostician(provider.clone())
            .diagnose("## Execution output\nunique marker abc123")
            .await
            .expect("diagnose");

        assert!(provider.requests()[0].messages[1]
            .content
            .contains("unique marker abc123"));
    }
}
