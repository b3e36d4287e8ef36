//! LLM integration for scriptsmith.
//!
//! Every LLM-backed stage goes through the [`LlmProvider`] trait so the
//! orchestrator can be exercised with mock providers in tests. The
//! production implementation is [`ChatClient`], an OpenAI-compatible
//! chat-completions client.

pub mod client;
pub mod mock;

pub use client::{
    ChatClient, Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
};
pub use mock::MockLlmProvider;
