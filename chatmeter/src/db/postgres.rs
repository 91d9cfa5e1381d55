//! PostgreSQL store implementation.
//!
//! Every [`Store`] operation that touches more than one row opens a transaction and composes
//! the repositories in [`handlers`](crate::db::handlers) on it.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{debug, instrument};

use crate::config::PoolSettings;
use crate::db::{
    Store,
    errors::{DbError, Result},
    handlers::{Accounts, ChatTurns, EnergyGrants, InvitationCodes, Subscriptions, WebhookEvents},
    models::{
        accounts::{AccountCreateDBRequest, AccountDBResponse},
        chat_turns::{ChatTurnCreateDBRequest, ChatTurnDBResponse, UsageCommitDBRequest, UsageCommitDBResponse},
        invitation_codes::InvitationConsumeOutcome,
        subscriptions::{ChangeDecision, SubscriptionChangeDBRequest, SubscriptionChangeOutcome, SubscriptionDBResponse},
    },
};

/// Get the chatmeter database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// [`Store`] backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool with the given settings. Zero idle or lifetime timeouts disable them.
    pub async fn connect(url: &str, settings: &PoolSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .idle_timeout((settings.idle_timeout_secs > 0).then(|| Duration::from_secs(settings.idle_timeout_secs)))
            .max_lifetime((settings.max_lifetime_secs > 0).then(|| Duration::from_secs(settings.max_lifetime_secs)))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> anyhow::Result<()> {
        migrator().run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn get_account(&self, account_id: &str) -> Result<Option<AccountDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Accounts::new(&mut conn).get(account_id).await
    }

    async fn get_or_create_account(&self, request: &AccountCreateDBRequest) -> Result<AccountDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Accounts::new(&mut conn).get_or_create(request).await
    }

    async fn find_account_by_customer(&self, customer_id: &str) -> Result<Option<AccountDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Accounts::new(&mut conn).find_by_customer(customer_id).await
    }

    async fn set_customer_id(&self, account_id: &str, customer_id: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Accounts::new(&mut conn).set_customer_id(account_id, customer_id).await
    }

    async fn list_recent_turns(&self, account_id: &str, limit: i64) -> Result<Vec<ChatTurnDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        ChatTurns::new(&mut conn).list_recent(account_id, limit).await
    }

    async fn append_turn(&self, turn: &ChatTurnCreateDBRequest) -> Result<ChatTurnDBResponse> {
        let mut conn = self.pool.acquire().await?;
        ChatTurns::new(&mut conn).insert_if_absent(turn).await
    }

    #[instrument(skip(self, commit), fields(account_id = %commit.account_id, debit = commit.debit), err)]
    async fn commit_usage(&self, commit: &UsageCommitDBRequest) -> Result<UsageCommitDBResponse> {
        if commit.debit < 0 {
            return Err(DbError::Other(anyhow::anyhow!("negative debit {}", commit.debit)));
        }

        let mut tx = self.pool.begin().await?;
        let balance_after = Accounts::new(&mut tx).debit(&commit.account_id, commit.debit).await?;
        ChatTurns::new(&mut tx).insert_if_absent(&commit.user_turn).await?;
        let assistant_turn = ChatTurns::new(&mut tx).insert_if_absent(&commit.assistant_turn).await?;
        tx.commit().await?;

        debug!("Committed usage, balance now {}", balance_after);
        Ok(UsageCommitDBResponse {
            balance_after,
            assistant_turn,
        })
    }

    async fn get_subscription(&self, account_id: &str) -> Result<Option<SubscriptionDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Subscriptions::new(&mut conn).get(account_id).await
    }

    #[instrument(skip(self, change), fields(event_id = %change.event_id, account_id = %change.account_id), err)]
    async fn apply_subscription_change(&self, change: &SubscriptionChangeDBRequest) -> Result<SubscriptionChangeOutcome> {
        let mut tx = self.pool.begin().await?;

        // The account row lock serializes concurrent deliveries for the same account
        if Accounts::new(&mut tx).lock(&change.account_id).await?.is_none() {
            return Err(DbError::NotFound);
        }
        if WebhookEvents::new(&mut tx).exists(&change.event_id).await? {
            return Ok(SubscriptionChangeOutcome::Duplicate);
        }

        let current = Subscriptions::new(&mut tx).get(&change.account_id).await?;
        let skipped = match change.decide(current.as_ref()) {
            ChangeDecision::Stale => Some(SubscriptionChangeOutcome::Stale),
            ChangeDecision::Superseded => Some(SubscriptionChangeOutcome::Superseded),
            ChangeDecision::Apply => None,
        };
        if let Some(outcome) = skipped {
            WebhookEvents::new(&mut tx)
                .record(&change.event_id, &change.event_type, &change.account_id, outcome.as_str())
                .await?;
            tx.commit().await?;
            return Ok(outcome);
        }

        let record = Subscriptions::new(&mut tx).upsert(change).await?;
        Accounts::new(&mut tx)
            .apply_entitlement(&change.account_id, change.tier, record.customer_id.as_deref(), change.zero_balance)
            .await?;

        let mut energy_granted = 0;
        if let Some(grant) = &change.grant
            && EnergyGrants::new(&mut tx)
                .insert_if_absent(&grant.grant_key, &change.account_id, change.tier, grant.amount)
                .await?
        {
            Accounts::new(&mut tx).credit(&change.account_id, grant.amount).await?;
            energy_granted = grant.amount;
        }

        let balance_after = Accounts::new(&mut tx)
            .get(&change.account_id)
            .await?
            .ok_or(DbError::NotFound)?
            .energy_balance;

        let outcome = SubscriptionChangeOutcome::Applied {
            balance_after,
            energy_granted,
        };
        let recorded = WebhookEvents::new(&mut tx)
            .record(&change.event_id, &change.event_type, &change.account_id, outcome.as_str())
            .await?;
        if !recorded {
            // A concurrent delivery of the same event committed first
            tx.rollback().await?;
            return Ok(SubscriptionChangeOutcome::Duplicate);
        }
        tx.commit().await?;
        Ok(outcome)
    }

    async fn create_invitation_code(&self, code: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        InvitationCodes::new(&mut conn).create(code).await
    }

    async fn consume_invitation_code(&self, code: &str, email: &str) -> Result<InvitationConsumeOutcome> {
        let mut conn = self.pool.acquire().await?;
        InvitationCodes::new(&mut conn).consume(code, email).await
    }
}
