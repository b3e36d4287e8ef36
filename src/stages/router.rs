//! Environment routing stage.
//!
//! Before each execution the router decides where and how a script runs:
//! native interpreter or container, piped source or wrapped script file.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tera::Context;

use crate::config::SynthesisConfig;
use crate::environment::EnvProfile;
use crate::execution::ExecutionRequest;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::prompts::{PromptLibrary, ROUTER_SYSTEM};
use crate::stages::{with_llm_retry, StageError};
use crate::utils::extract_json;

/// Routing decision for one script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Language the script is written in, lowercased.
    pub language: String,
    /// Run inside a container instead of a native interpreter.
    pub use_isolated: bool,
    /// Container image for isolated runs.
    #[serde(default)]
    pub image: Option<String>,
    /// The language needs a script file plus a shell command.
    #[serde(default)]
    pub needs_wrap: bool,
    /// Shell command that runs the script file.
    #[serde(default)]
    pub wrapped_command: Option<String>,
    /// File name the script is written to.
    #[serde(default)]
    pub script_file: Option<String>,
}

impl RouteDecision {
    /// Combines the decision with script source into an execution request.
    pub fn into_request(self, code: String) -> ExecutionRequest {
        let (command, script_file) = if self.needs_wrap {
            (self.wrapped_command, self.script_file)
        } else {
            (None, None)
        };

        ExecutionRequest {
            code,
            language: self.language,
            command,
            script_file,
            isolated: self.use_isolated,
            image: self.image,
        }
    }
}

/// Stage agent picking the runtime for a script.
pub struct EnvRouter {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<PromptLibrary>,
    model: String,
    retries: u32,
}

impl EnvRouter {
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

    /// Routes a script against the environment profile.
    ///
    /// An internally inconsistent decision (isolated without an image,
    /// wrapped without a command) counts as malformed and is retried.
    pub async fn route(
        &self,
        code: &str,
        profile: &EnvProfile,
    ) -> Result<RouteDecision, StageError> {
        let mut context = Context::new();
        context.insert("code", code);
        context.insert("native_runtimes", &profile.native_runtimes_text());
        context.insert("container_images", &profile.images_text());
        let user = self.prompts.render("router.user", &context)?;

        with_llm_retry("router", self.retries, || {
            let request = GenerationRequest::new(
                self.model.clone(),
                vec![Message::system(ROUTER_SYSTEM), Message::user(user.clone())],
            );

            async move {
                let response = self.provider.generate(request).await?;
                let content = response
                    .first_content()
                    .ok_or_else(|| StageError::MalformedResponse("empty completion".into()))?;

                let json = extract_json(content)
                    .into_result(content)
                    .map_err(StageError::MalformedResponse)?;

                let mut decision: RouteDecision = serde_json::from_str(&json).map_err(|e| {
                    StageError::MalformedResponse(format!("invalid route decision: {e}"))
                })?;
                decision.language = decision.language.to_lowercase();

                if decision.use_isolated && decision.image.is_none() {
                    return Err(StageError::MalformedResponse(
                        "isolated execution chosen without an image".into(),
                    ));
                }
                if decision.needs_wrap
                    && (decision.wrapped_command.is_none() || decision.script_file.is_none())
                {
                    return Err(StageError::MalformedResponse(
                        "wrapped execution chosen without command or file".into(),
                    ));
                }

                Ok(decision)
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{ImageProfile, NativeRuntime};
    use crate::llm::MockLlmProvider;

    fn router(provider: Arc<MockLlmProvider>) -> EnvRouter {
        EnvRouter::new(
            provider,
            Arc::new(PromptLibrary::builtin().expect("library")),
            &SynthesisConfig::default(),
        )
    }

    fn r_profile() -> EnvProfile {
        EnvProfile::new()
            .with_native(NativeRuntime::new(
                "python",
                "3.11",
                vec!["python3".into(), "-c".into()],
            ))
            .with_image(ImageProfile {
                image: "rocker/tidyverse:4.3".into(),
                description: "R with tidyverse".into(),
                languages: vec!["r".into()],
            })
    }

    #[tokio::test]
    async fn test_native_python_route() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.push_response(
            r#"{"language": "Python", "use_isolated": false, "image": null, "needs_wrap": false, "wrapped_command": null, "script_file": null}"#,
        );

        let decision = router(provider.clone())
            .route("import os", &r_profile())
            .await
            .expect("route");

        assert_eq!(decision.language, "python");
        assert!(!decision.use_isolated);

        // Profile text is in the prompt.
        let user = &provider.requests()[0].messages[1].content;
        assert!(user.contains("python 3.11"));
        assert!(user.contains("rocker/tidyverse:4.3"));
    }

    #[tokio::test]
    async fn test_isolated_wrapped_r_route() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.push_response(
            r#"{"language": "r", "use_isolated": true, "image": "rocker/tidyverse:4.3", "needs_wrap": true, "wrapped_command": "Rscript analysis.R", "script_file": "analysis.R"}"#,
        );

        let decision = router(provider)
            .route("library(tidyverse)", &r_profile())
            .await
            .expect("route");

        let request = decision.into_request("library(tidyverse)".to_string());
        assert!(request.isolated);
        assert_eq!(request.image.as_deref(), Some("rocker/tidyverse:4.3"));
        assert_eq!(request.command.as_deref(), Some("Rscript analysis.R"));
        assert_eq!(request.script_file.as_deref(), Some("analysis.R"));
    }

    #[tokio::test]
    async fn test_inconsistent_decision_is_retried() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.push_response(
            r#"{"language": "r", "use_isolated": true, "image": null, "needs_wrap": false, "wrapped_command": null, "script_file": null}"#,
        );
        provider.push_response(
            r#"{"language": "r", "use_isolated": true, "image": "rocker/tidyverse:4.3", "needs_wrap": false, "wrapped_command": null, "script_file": null}"#,
        );

        let decision = router(provider.clone())
            .route("library(tidyverse)", &r_profile())
            .await
            .expect("route");

        assert_eq!(decision.image.as_deref(), Some("rocker/tidyverse:4.3"));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_wrap_fields_dropped_when_not_wrapping() {
        let decision = RouteDecision {
            language: "python".into(),
            use_isolated: false,
            image: None,
            needs_wrap: false,
            wrapped_command: Some("stale".into()),
            script_file: Some("stale.py".into()),
        };

        let request = decision.into_request("print(1)".into());
        assert!(request.command.is_none());
        assert!(request.script_file.is_none());
    }
}
