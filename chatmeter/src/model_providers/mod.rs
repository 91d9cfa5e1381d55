//! Generative model abstraction layer
//!
//! The chat engine sends an assembled conversation to a `dyn ModelProvider` and gets back the
//! generated reply together with the token usage the provider measured. Billing is always based
//! on the provider's usage figures, never on local counts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;

pub mod dummy;
pub mod openai;

/// Create a model provider from configuration
pub fn create_provider(config: ModelConfig) -> Result<Box<dyn ModelProvider>> {
    match config {
        ModelConfig::OpenAi(openai_config) => Ok(Box::new(openai::OpenAiProvider::new(openai_config)?)),
        ModelConfig::Dummy => Ok(Box::new(dummy::DummyProvider)),
    }
}

/// Result type for model provider operations
pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

/// Role of a message in the prompt sent to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Token usage as reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

/// A completed generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Generate the next assistant turn for `messages`, producing at most `max_output_tokens`.
    async fn generate(&self, messages: &[ChatMessage], max_output_tokens: i64) -> Result<Generation>;
}
