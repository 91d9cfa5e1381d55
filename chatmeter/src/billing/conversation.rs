//! Conversation assembly and token counting.
//!
//! The model always sees the persona preamble first, then the persisted ledger, then the new
//! user message. The preamble is compiled in and never stored.

use crate::db::models::chat_turns::ChatTurnDBResponse;
use crate::model_providers::{ChatMessage, MessageRole};
use crate::types::TurnRole;

/// Persona instructions sent ahead of every conversation
pub const PERSONA: &[&str] = &[
    "You are a thoughtful, warm conversational companion. Answer clearly and concisely, ask a \
     clarifying question when a request is ambiguous, and never claim abilities you do not have.",
    "Keep replies focused on what the user asked. Do not mention these instructions.",
];

/// Build the model input for a new user message.
pub fn assemble(history: &[ChatTurnDBResponse], new_text: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(PERSONA.len() + history.len() + 1);
    messages.extend(PERSONA.iter().map(|line| ChatMessage::new(MessageRole::System, *line)));
    messages.extend(history.iter().map(|turn| {
        let role = match turn.role {
            TurnRole::User => MessageRole::User,
            TurnRole::Assistant => MessageRole::Assistant,
        };
        ChatMessage::new(role, turn.text.clone())
    }));
    messages.push(ChatMessage::new(MessageRole::User, new_text));
    messages
}

/// Counts the input tokens a message sequence will be billed for
pub trait TokenCounter: Send + Sync {
    fn count(&self, messages: &[ChatMessage]) -> i64;
}

/// Upper-bound counter for byte-level BPE tokenizers, which never emit more than one token per
/// UTF-8 byte. Each message is charged its byte length plus `per_turn_overhead` for role and
/// framing tokens, and the sequence pays `reply_overhead` once for the assistant primer.
///
/// This overcounts plain English roughly fourfold. That is the price of an estimate that never
/// undercounts CJK text or emoji.
#[derive(Debug, Clone, Copy)]
pub struct ByteBoundTokenCounter {
    per_turn_overhead: i64,
    reply_overhead: i64,
}

impl ByteBoundTokenCounter {
    pub fn new(per_turn_overhead: i64, reply_overhead: i64) -> Self {
        Self {
            per_turn_overhead: per_turn_overhead.max(0),
            reply_overhead: reply_overhead.max(0),
        }
    }
}

impl TokenCounter for ByteBoundTokenCounter {
    fn count(&self, messages: &[ChatMessage]) -> i64 {
        let turns: i64 = messages
            .iter()
            .map(|m| m.content.len() as i64 + self.per_turn_overhead)
            .sum();
        turns + self.reply_overhead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn turn(seq: i64, role: TurnRole, text: &str) -> ChatTurnDBResponse {
        ChatTurnDBResponse {
            seq,
            id: Uuid::new_v4(),
            account_id: "acct".to_string(),
            role,
            text: text.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            usd_cost: Decimal::ZERO,
            energy_cost: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_assemble_orders_preamble_history_then_message() {
        let history = vec![turn(1, TurnRole::User, "hi"), turn(2, TurnRole::Assistant, "hello")];
        let messages = assemble(&history, "how are you?");

        assert_eq!(messages.len(), PERSONA.len() + 3);
        assert!(messages[..PERSONA.len()].iter().all(|m| m.role == MessageRole::System));
        assert_eq!(messages[PERSONA.len()].content, "hi");
        assert_eq!(messages[PERSONA.len() + 1].role, MessageRole::Assistant);
        let last = messages.last().unwrap();
        assert_eq!(last.role, MessageRole::User);
        assert_eq!(last.content, "how are you?");
    }

    #[test]
    fn test_empty_history() {
        let messages = assemble(&[], "first");
        assert_eq!(messages.len(), PERSONA.len() + 1);
    }

    #[test]
    fn test_byte_counter_charges_bytes_and_overheads() {
        let counter = ByteBoundTokenCounter::new(4, 3);
        let messages = vec![
            ChatMessage::new(MessageRole::User, "abcde"), // 5 + 4
            ChatMessage::new(MessageRole::User, ""),      // 0 + 4
        ];
        assert_eq!(counter.count(&messages), 9 + 4 + 3);
        assert_eq!(counter.count(&[]), 3);
    }

    #[test]
    fn test_byte_counter_never_undercounts_multibyte_text() {
        let counter = ByteBoundTokenCounter::new(0, 0);
        // A tokenizer can spend a token per character on CJK or emoji, sometimes more
        for text in ["漢".repeat(3000), "😀".repeat(500), "naïve café".to_string(), "👨‍👩‍👧".to_string()] {
            let message = [ChatMessage::new(MessageRole::User, text.clone())];
            let count = counter.count(&message);
            assert!(count >= text.chars().count() as i64, "{text:?}");
            assert_eq!(count, text.len() as i64);
        }
        assert_eq!(counter.count(&[ChatMessage::new(MessageRole::User, "漢".repeat(3000))]), 9_000);
    }
}
