//! Code generation and repair stage.

use std::sync::Arc;

use tera::Context;

use crate::config::SynthesisConfig;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::prompts::{build_generate_system, PromptLibrary, REPAIR_SYSTEM};
use crate::stages::{with_llm_retry, StageError};
use crate::utils::extract_code_block;

/// What the generator is reacting to.
#[derive(Debug, Clone)]
pub enum FeedbackContext {
    /// First attempt, or a restart with no carried feedback.
    Fresh,
    /// Reviewer rejected the previous artifact with this feedback.
    Critique(String),
    /// Execution failed; repair against the diagnosis, optionally informed
    /// by a web research summary.
    Repair {
        diagnosis: String,
        web_summary: Option<String>,
    },
}

/// Inputs for one generation call.
#[derive(Debug, Clone)]
pub struct GenerateInput<'a> {
    /// Natural-language task instruction.
    pub task_instruction: &'a str,
    /// Description of the input data and expected I/O.
    pub data_perception: &'a str,
    /// Script produced by the preceding workflow step, when part of one.
    pub prior_code: Option<&'a str>,
    /// Reference snippets accomplishing similar tasks.
    pub references: Option<&'a str>,
    /// The most recent artifact for this task, when revising or repairing.
    pub last_artifact: Option<&'a str>,
    /// Language of the last artifact, used as extraction preference.
    pub preferred_language: Option<&'a str>,
    /// Feedback driving this attempt.
    pub feedback: &'a FeedbackContext,
}

/// One generated script.
#[derive(Debug, Clone)]
pub struct GeneratedScript {
    /// Script source, fence-stripped.
    pub code: String,
    /// Language from the fence tag, lowercased.
    pub language: String,
}

/// Stage agent producing scripts from task context and feedback.
pub struct CodeGenerator {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<PromptLibrary>,
    model: String,
    temperature: f64,
    retries: u32,
}

impl CodeGenerator {
    /// Creates a generator using the config's code model and budgets.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<PromptLibrary>,
        config: &SynthesisConfig,
    ) -> Self {
        Self {
            provider,
            prompts,
            model: config.code_model.clone(),
            temperature: config.code_temperature,
            retries: config.llm_retries,
        }
    }

    /// Generates a script for the task, honoring the feedback mode.
    ///
    /// A response with no usable code block counts as malformed and is
    /// retried within the stage budget.
    pub async fn generate(&self, input: &GenerateInput<'_>) -> Result<GeneratedScript, StageError> {
        let (system, user) = self.build_prompt(input)?;

        with_llm_retry("generate", self.retries, || {
            let request = GenerationRequest::new(
                self.model.clone(),
                vec![Message::system(system.clone()), Message::user(user.clone())],
            )
            .with_temperature(self.temperature);

            async move {
                let response = self.provider.generate(request).await?;
                let content = response
                    .first_content()
                    .ok_or_else(|| StageError::MalformedResponse("empty completion".into()))?;

                let block = extract_code_block(content, input.preferred_language)
                    .ok_or_else(|| {
                        StageError::MalformedResponse("response contained no code block".into())
                    })?;

                let language = block
                    .language
                    .or_else(|| input.preferred_language.map(str::to_lowercase))
                    .unwrap_or_else(|| "python".to_string());

                Ok(GeneratedScript {
                    code: block.code,
                    language,
                })
            }
        })
        .await
    }

    fn build_prompt(&self, input: &GenerateInput<'_>) -> Result<(String, String), StageError> {
        match input.feedback {
            FeedbackContext::Fresh | FeedbackContext::Critique(_) => {
                let critique = match input.feedback {
                    FeedbackContext::Critique(feedback) => Some(feedback.as_str()),
                    _ => None,
                };

                let mut context = Context::new();
                context.insert("data_perception", input.data_perception);
                context.insert("prior_code", &input.prior_code);
                context.insert("last_artifact", &input.last_artifact);
                context.insert("critique", &critique);
                context.insert("references", &input.references);

                let user = self.prompts.render("generate.user", &context)?;
                Ok((build_generate_system(input.task_instruction), user))
            }
            FeedbackContext::Repair {
                diagnosis,
                web_summary,
            } => {
                let mut context = Context::new();
                context.insert("code", &input.last_artifact.unwrap_or_default());
                context.insert("data_perception", input.data_perception);
                context.insert("error_summary", diagnosis);
                context.insert("web_summary", web_summary);

                let user = self.prompts.render("repair.user", &context)?;
                Ok((REPAIR_SYSTEM.to_string(), user))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmProvider;

    fn generator(provider: Arc<MockLlmProvider>) -> CodeGenerator {
        CodeGenerator::new(
            provider,
            Arc::new(PromptLibrary::builtin().expect("library")),
            &SynthesisConfig::default(),
        )
    }

    fn fresh_input<'a>(feedback: &'a FeedbackContext) -> GenerateInput<'a> {
        GenerateInput {
            task_instruction: "normalize the counts matrix",
            data_perception: "counts.csv: genes x cells",
            prior_code: None,
            references: None,
            last_artifact: None,
            preferred_language: None,
            feedback,
        }
    }

    #[tokio::test]
    async fn test_fresh_generation() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.push_response("```python\nimport pandas as pd\n```");

        let feedback = FeedbackContext::Fresh;
        let script = generator(provider.clone())
            .generate(&fresh_input(&feedback))
            .await
            .expect("generate");

        assert_eq!(script.language, "python");
        assert_eq!(script.code, "import pandas as pd");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].messages[0].content.contains("normalize the counts matrix"));
        assert!(requests[0].messages[1].content.contains("counts.csv"));
    }

    #[tokio::test]
    async fn test_critique_feedback_reaches_prompt() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.push_response("```python\nfixed = True\n```");

        let feedback = FeedbackContext::Critique("output path is wrong".to_string());
        let mut input = fresh_input(&feedback);
        input.last_artifact = Some("old = True");

        generator(provider.clone())
            .generate(&input)
            .await
            .expect("generate");

        let user = &provider.requests()[0].messages[1].content;
        assert!(user.contains("Reviewer feedback"));
        assert!(user.contains("output path is wrong"));
        assert!(user.contains("old = True"));
    }

    #[tokio::test]
    async fn test_repair_mode_uses_repair_prompt() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.push_response("```python\nimport scanpy\n```");

        let feedback = FeedbackContext::Repair {
            diagnosis: "ModuleNotFoundError: scanpy".to_string(),
            web_summary: Some("install scanpy via pip".to_string()),
        };
        let mut input = fresh_input(&feedback);
        input.last_artifact = Some("import scnapy");

        generator(provider.clone())
            .generate(&input)
            .await
            .expect("generate");

        let requests = provider.requests();
        assert!(requests[0].messages[0].content.contains("failed at runtime"));
        let user = &requests[0].messages[1].content;
        assert!(user.contains("ModuleNotFoundError"));
        assert!(user.contains("Web solution"));
        assert!(user.contains("import scnapy"));
    }

    #[tokio::test]
    async fn test_missing_code_block_is_retried() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.push_response("I cannot write that script, sorry.");
        provider.push_response("```python\nok = 1\n```");

        let feedback = FeedbackContext::Fresh;
        let script = generator(provider.clone())
            .generate(&fresh_input(&feedback))
            .await
            .expect("generate");

        assert_eq!(script.code, "ok = 1");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unfenced_responses_exhaust_budget() {
        let provider = Arc::new(MockLlmProvider::new());
        for _ in 0..SynthesisConfig::default().llm_retries {
            provider.push_response("no code here");
        }

        let feedback = FeedbackContext::Fresh;
        let err = generator(provider)
            .generate(&fresh_input(&feedback))
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::RetriesExhausted { .. }));
    }
}
