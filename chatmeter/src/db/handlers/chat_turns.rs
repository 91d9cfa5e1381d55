//! Repository for the `chat_turns` ledger.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::{
    errors::{DbError, Result},
    models::chat_turns::{ChatTurnCreateDBRequest, ChatTurnDBResponse},
};
use crate::types::TurnRole;

pub struct ChatTurns<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ChatTurns<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn get(&mut self, id: Uuid) -> Result<Option<ChatTurnDBResponse>> {
        let turn = sqlx::query_as!(
            ChatTurnDBResponse,
            r#"
            SELECT seq, id, account_id, role as "role: TurnRole", text, input_tokens, output_tokens, total_tokens,
                   usd_cost, energy_cost, created_at
            FROM chat_turns
            WHERE id = $1
            "#,
            id
        )
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(turn)
    }

    /// Insert a turn unless one with the same id exists; either way return the stored row
    pub async fn insert_if_absent(&mut self, turn: &ChatTurnCreateDBRequest) -> Result<ChatTurnDBResponse> {
        sqlx::query!(
            r#"
            INSERT INTO chat_turns (id, account_id, role, text, input_tokens, output_tokens, total_tokens,
                                    usd_cost, energy_cost, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
            turn.id,
            turn.account_id,
            &turn.role as &TurnRole,
            turn.text,
            turn.input_tokens,
            turn.output_tokens,
            turn.total_tokens,
            turn.usd_cost,
            turn.energy_cost,
            turn.created_at
        )
        .execute(&mut *self.db)
        .await?;

        self.get(turn.id).await?.ok_or(DbError::NotFound)
    }

    /// The `limit` most recent turns of an account, returned oldest first
    pub async fn list_recent(&mut self, account_id: &str, limit: i64) -> Result<Vec<ChatTurnDBResponse>> {
        let mut turns = sqlx::query_as!(
            ChatTurnDBResponse,
            r#"
            SELECT seq, id, account_id, role as "role: TurnRole", text, input_tokens, output_tokens, total_tokens,
                   usd_cost, energy_cost, created_at
            FROM chat_turns
            WHERE account_id = $1
            ORDER BY created_at DESC, seq DESC
            LIMIT $2
            "#,
            account_id,
            limit.max(0)
        )
        .fetch_all(&mut *self.db)
        .await?;
        turns.reverse();
        Ok(turns)
    }
}
