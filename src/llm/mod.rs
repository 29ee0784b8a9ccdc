//! Language-model endpoint capability.

pub mod client;
pub mod error;
pub mod types;

use async_trait::async_trait;

pub use client::{ChatClient, RetryPolicy};
pub use error::LlmError;
pub use types::{ChatMessage, ChatOptions, ChatRequest, ChatResponse};

/// Anything that turns a conversation into one reply.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError>;
}
