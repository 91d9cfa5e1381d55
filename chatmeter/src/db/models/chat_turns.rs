//! Database models for the conversation ledger.

use crate::types::{AccountId, TurnRole};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Database request for appending a turn.
///
/// `id` is the idempotency key: appending the same id twice stores one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurnCreateDBRequest {
    pub id: Uuid,
    pub account_id: AccountId,
    pub role: TurnRole,
    pub text: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub usd_cost: Decimal,
    pub energy_cost: i64,
    pub created_at: DateTime<Utc>,
}

impl ChatTurnCreateDBRequest {
    /// A user turn. User turns never carry cost; the exchange is billed on the assistant turn.
    pub fn user(account_id: impl Into<AccountId>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.into(),
            role: TurnRole::User,
            text: text.into(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            usd_cost: Decimal::ZERO,
            energy_cost: 0,
            created_at: Utc::now(),
        }
    }

    /// An assistant turn carrying the cost of the whole exchange
    pub fn assistant(
        account_id: impl Into<AccountId>,
        text: impl Into<String>,
        input_tokens: i64,
        output_tokens: i64,
        total_tokens: i64,
        usd_cost: Decimal,
        energy_cost: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.into(),
            role: TurnRole::Assistant,
            text: text.into(),
            input_tokens,
            output_tokens,
            total_tokens,
            usd_cost,
            energy_cost,
            created_at: Utc::now(),
        }
    }
}

/// Database response for a persisted turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurnDBResponse {
    /// Store-assigned, strictly increasing; orders turns that share a timestamp
    pub seq: i64,
    pub id: Uuid,
    pub account_id: AccountId,
    pub role: TurnRole,
    pub text: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub usd_cost: Decimal,
    pub energy_cost: i64,
    pub created_at: DateTime<Utc>,
}

/// One billed exchange, committed atomically
#[derive(Debug, Clone)]
pub struct UsageCommitDBRequest {
    pub account_id: AccountId,
    /// Appended only if a turn with the same id is not already stored
    pub user_turn: ChatTurnCreateDBRequest,
    pub assistant_turn: ChatTurnCreateDBRequest,
    /// Energy to debit; the commit aborts rather than take the balance below zero
    pub debit: i64,
}

#[derive(Debug, Clone)]
pub struct UsageCommitDBResponse {
    pub balance_after: i64,
    pub assistant_turn: ChatTurnDBResponse,
}
