use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::models::chat_turns::ChatTurnDBResponse;
use crate::types::TurnRole;

pub use crate::billing::chat::{ChatReply, ChatUsage};

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatRequest {
    /// The user's message
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Most recent turns to return (default 50, max 500)
    pub limit: Option<i64>,
}

impl HistoryQuery {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT)
    }
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub role: TurnRole,
    pub text: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    /// Cost in USD, carried on assistant turns
    #[schema(value_type = String)]
    pub usd_cost: Decimal,
    pub energy_cost: i64,
    pub created_at: DateTime<Utc>,
}

impl From<ChatTurnDBResponse> for ChatTurnResponse {
    fn from(turn: ChatTurnDBResponse) -> Self {
        Self {
            id: turn.id,
            role: turn.role,
            text: turn.text,
            input_tokens: turn.input_tokens,
            output_tokens: turn.output_tokens,
            total_tokens: turn.total_tokens,
            usd_cost: turn.usd_cost,
            energy_cost: turn.energy_cost,
            created_at: turn.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatHistoryResponse {
    pub turns: Vec<ChatTurnResponse>,
}
