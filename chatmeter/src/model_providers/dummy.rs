//! Echo model for local development. Usage is approximated at four characters per token.

use async_trait::async_trait;

use crate::model_providers::{ChatMessage, Generation, MessageRole, ModelProvider, Result, TokenUsage};

pub struct DummyProvider;

fn approx_tokens(text: &str) -> i64 {
    (text.chars().count() as i64 + 3) / 4
}

#[async_trait]
impl ModelProvider for DummyProvider {
    async fn generate(&self, messages: &[ChatMessage], max_output_tokens: i64) -> Result<Generation> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        // Truncate so the reported usage never exceeds the output cap
        let max_chars = usize::try_from(max_output_tokens.max(0) * 4).unwrap_or(usize::MAX);
        let text: String = format!("You said: {last_user}").chars().take(max_chars).collect();

        let input_tokens = messages.iter().map(|m| approx_tokens(&m.content)).sum();
        let output_tokens = approx_tokens(&text);
        Ok(Generation {
            text,
            usage: TokenUsage {
                input_tokens,
                output_tokens,
                total_tokens: input_tokens + output_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echoes_last_user_message() {
        let messages = vec![
            ChatMessage::new(MessageRole::System, "persona"),
            ChatMessage::new(MessageRole::User, "first"),
            ChatMessage::new(MessageRole::Assistant, "reply"),
            ChatMessage::new(MessageRole::User, "second"),
        ];
        let generation = DummyProvider.generate(&messages, 100).await.unwrap();
        assert_eq!(generation.text, "You said: second");
        assert_eq!(generation.usage.output_tokens, 4);
    }

    #[tokio::test]
    async fn test_output_respects_cap() {
        let messages = vec![ChatMessage::new(MessageRole::User, "x".repeat(400))];
        let generation = DummyProvider.generate(&messages, 10).await.unwrap();
        assert!(generation.usage.output_tokens <= 10);
    }
}
