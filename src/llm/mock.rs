//! Scripted LLM provider for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::client::{
    Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
};

/// Provider that replays a fixed queue of completions.
///
/// Each `generate` call pops the next queued response and records the
/// request for later assertions. An exhausted queue is an error, so a test
/// that makes more calls than it scripted fails loudly.
#[derive(Default)]
pub struct MockLlmProvider {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a completion to be returned by a future `generate` call.
    pub fn push_response(&self, content: impl Into<String>) {
        self.responses.lock().unwrap().push_back(content.into());
    }

    /// Requests observed so far, in call order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of `generate` calls made.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);

        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(LlmError::EmptyCompletion(model))?;

        Ok(GenerationResponse {
            id: format!("mock-{}", self.call_count()),
            model: "mock".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage {
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
            },
        })
    }
}
