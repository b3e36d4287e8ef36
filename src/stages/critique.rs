//! Pre-execution code review stage.

use std::sync::Arc;

use serde::Deserialize;
use tera::Context;

use crate::config::SynthesisConfig;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::prompts::{build_critique_system, PromptLibrary};
use crate::stages::{with_llm_retry, StageError};
use crate::utils::extract_json;

/// Reviewer verdict on a candidate script.
#[derive(Debug, Clone, Deserialize)]
pub struct CritiqueVerdict {
    /// Whether the script may proceed to execution.
    pub approved: bool,
    /// Actionable critique when not approved.
    #[serde(default)]
    pub feedback: String,
}

/// Stage agent reviewing candidate scripts before execution.
pub struct ScriptCritic {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<PromptLibrary>,
    model: String,
    retries: u32,
}

impl ScriptCritic {
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

    /// Reviews a script against the task instruction.
    pub async fn review(
        &self,
        task_instruction: &str,
        code: &str,
    ) -> Result<CritiqueVerdict, StageError> {
        let system = build_critique_system(task_instruction);

        let mut context = Context::new();
        context.insert("code", code);
        let user = self.prompts.render("critique.user", &context)?;

        with_llm_retry("critique", self.retries, || {
            let request = GenerationRequest::new(
                self.model.clone(),
                vec![Message::system(system.clone()), Message::user(user.clone())],
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
                    StageError::MalformedResponse(format!("invalid critique verdict: {e}"))
                })
            }
        })
        .await
    }
}
