//! Repositories for the subscription mirror, processed webhook events and energy grants.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::db::{
    errors::Result,
    models::subscriptions::{SubscriptionChangeDBRequest, SubscriptionDBResponse},
};
use crate::types::Tier;

pub struct Subscriptions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Subscriptions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn get(&mut self, account_id: &str) -> Result<Option<SubscriptionDBResponse>> {
        let record = sqlx::query_as!(
            SubscriptionDBResponse,
            r#"
            SELECT account_id, subscription_id, status, price_id, current_period_end, customer_id,
                   last_event_at, updated_at
            FROM subscriptions
            WHERE account_id = $1
            "#,
            account_id
        )
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(record)
    }

    /// Write the snapshot values of a change. A missing customer id keeps the stored one and
    /// `last_event_at` only ever moves forward.
    pub async fn upsert(&mut self, change: &SubscriptionChangeDBRequest) -> Result<SubscriptionDBResponse> {
        let record = sqlx::query_as!(
            SubscriptionDBResponse,
            r#"
            INSERT INTO subscriptions (account_id, subscription_id, status, price_id, current_period_end,
                                       customer_id, last_event_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (account_id) DO UPDATE SET
                subscription_id = EXCLUDED.subscription_id,
                status = EXCLUDED.status,
                price_id = EXCLUDED.price_id,
                current_period_end = EXCLUDED.current_period_end,
                customer_id = COALESCE(EXCLUDED.customer_id, subscriptions.customer_id),
                last_event_at = GREATEST(subscriptions.last_event_at, EXCLUDED.last_event_at),
                updated_at = NOW()
            RETURNING account_id, subscription_id, status, price_id, current_period_end, customer_id,
                      last_event_at, updated_at
            "#,
            change.account_id,
            change.subscription_id,
            change.status,
            change.price_id,
            change.current_period_end,
            change.customer_id,
            change.event_created
        )
        .fetch_one(&mut *self.db)
        .await?;
        Ok(record)
    }
}

pub struct WebhookEvents<'c> {
    db: &'c mut PgConnection,
}

impl<'c> WebhookEvents<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn exists(&mut self, event_id: &str) -> Result<bool> {
        let exists = sqlx::query_scalar!(
            r#"SELECT EXISTS (SELECT 1 FROM processed_webhook_events WHERE event_id = $1) as "exists!""#,
            event_id
        )
        .fetch_one(&mut *self.db)
        .await?;
        Ok(exists)
    }

    /// Record an event as processed. Returns false if it was already recorded.
    pub async fn record(&mut self, event_id: &str, event_type: &str, account_id: &str, outcome: &str) -> Result<bool> {
        let result = sqlx::query!(
            r#"
            INSERT INTO processed_webhook_events (event_id, event_type, account_id, outcome)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id) DO NOTHING
            "#,
            event_id,
            event_type,
            account_id,
            outcome
        )
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn processed_at(&mut self, event_id: &str) -> Result<Option<DateTime<Utc>>> {
        let processed_at = sqlx::query_scalar!("SELECT processed_at FROM processed_webhook_events WHERE event_id = $1", event_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(processed_at)
    }
}

pub struct EnergyGrants<'c> {
    db: &'c mut PgConnection,
}

impl<'c> EnergyGrants<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Record a grant. Returns false if the key was granted before, in which case the caller
    /// must not credit the balance.
    pub async fn insert_if_absent(&mut self, grant_key: &str, account_id: &str, tier: Tier, amount: i64) -> Result<bool> {
        let result = sqlx::query!(
            r#"
            INSERT INTO energy_grants (grant_key, account_id, tier, amount)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (grant_key) DO NOTHING
            "#,
            grant_key,
            account_id,
            &tier as &Tier,
            amount
        )
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
