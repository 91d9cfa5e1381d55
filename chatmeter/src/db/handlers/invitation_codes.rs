//! Repository for one-time invitation codes.

use sqlx::PgConnection;

use crate::db::{
    errors::Result,
    models::invitation_codes::{InvitationCodeDBResponse, InvitationConsumeOutcome},
};

pub struct InvitationCodes<'c> {
    db: &'c mut PgConnection,
}

impl<'c> InvitationCodes<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn create(&mut self, code: &str) -> Result<bool> {
        let result = sqlx::query!("INSERT INTO invitation_codes (code) VALUES ($1) ON CONFLICT (code) DO NOTHING", code)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get(&mut self, code: &str) -> Result<Option<InvitationCodeDBResponse>> {
        let record = sqlx::query_as!(
            InvitationCodeDBResponse,
            "SELECT code, is_used, used_by_email, used_at FROM invitation_codes WHERE code = $1",
            code
        )
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(record)
    }

    /// Bind an unused code to `email`. The update only matches unused rows, so two concurrent
    /// callers cannot both consume the same code.
    pub async fn consume(&mut self, code: &str, email: &str) -> Result<InvitationConsumeOutcome> {
        let consumed = sqlx::query!(
            r#"
            UPDATE invitation_codes
            SET is_used = TRUE, used_by_email = $2, used_at = NOW()
            WHERE code = $1 AND is_used = FALSE
            "#,
            code,
            email
        )
        .execute(&mut *self.db)
        .await?;
        if consumed.rows_affected() == 1 {
            return Ok(InvitationConsumeOutcome::Consumed);
        }

        Ok(match self.get(code).await? {
            None => InvitationConsumeOutcome::NotFound,
            Some(record) if record.used_by_email.as_deref() == Some(email) => InvitationConsumeOutcome::AlreadyConsumedBySameEmail,
            Some(_) => InvitationConsumeOutcome::UsedByAnotherEmail,
        })
    }
}
