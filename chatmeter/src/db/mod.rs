//! Store layer for data persistence and access.
//!
//! All durable state sits behind the [`Store`] trait so the billing engine can run against
//! PostgreSQL in production and a process-local store in development and tests.
//!
//! ```text
//! ┌──────────────┐
//! │ billing::*   │  (engine components)
//! └──────┬───────┘
//!        ↓
//! ┌──────────────┐
//! │  dyn Store   │  (atomic operations)
//! └──────┬───────┘
//!        ↓
//! ┌──────────────┬───────────────┐
//! │ PostgresStore│ InMemoryStore │
//! │ (handlers::*)│               │
//! └──────────────┴───────────────┘
//! ```
//!
//! Every operation that mutates balance or tier is a single atomic unit in both
//! implementations: a transaction in PostgreSQL, a single lock acquisition in memory.

use async_trait::async_trait;

use crate::db::errors::Result;
use crate::db::models::{
    accounts::{AccountCreateDBRequest, AccountDBResponse},
    chat_turns::{ChatTurnCreateDBRequest, ChatTurnDBResponse, UsageCommitDBRequest, UsageCommitDBResponse},
    invitation_codes::InvitationConsumeOutcome,
    subscriptions::{SubscriptionChangeDBRequest, SubscriptionChangeOutcome, SubscriptionDBResponse},
};

pub mod errors;
pub mod handlers;
pub mod in_memory;
pub mod models;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Durable state of the billing engine.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_account(&self, account_id: &str) -> Result<Option<AccountDBResponse>>;

    /// Fetch the account, creating it with the initial balance if it does not exist.
    /// An existing account's email is refreshed; its balance is never touched.
    async fn get_or_create_account(&self, request: &AccountCreateDBRequest) -> Result<AccountDBResponse>;

    /// Account whose cached customer pointer is `customer_id`
    async fn find_account_by_customer(&self, customer_id: &str) -> Result<Option<AccountDBResponse>>;

    /// Cache the payment customer pointer on an account
    async fn set_customer_id(&self, account_id: &str, customer_id: &str) -> Result<()>;

    /// The `limit` most recent turns of an account, oldest first
    async fn list_recent_turns(&self, account_id: &str, limit: i64) -> Result<Vec<ChatTurnDBResponse>>;

    /// Append a turn. Appending an id that is already stored returns the stored turn unchanged.
    async fn append_turn(&self, turn: &ChatTurnCreateDBRequest) -> Result<ChatTurnDBResponse>;

    /// Debit the balance and append both turns of an exchange, all or nothing.
    ///
    /// # Errors
    /// - `BalanceWouldGoNegative` if the debit exceeds the live balance; nothing is written
    /// - `NotFound` if the account does not exist
    async fn commit_usage(&self, commit: &UsageCommitDBRequest) -> Result<UsageCommitDBResponse>;

    async fn get_subscription(&self, account_id: &str) -> Result<Option<SubscriptionDBResponse>>;

    /// Apply a subscription change exactly once per event id.
    ///
    /// In one atomic unit: record the event id, check ordering against the stored record, write
    /// the subscription mirror, tier and customer pointer, optionally zero the balance, and credit
    /// the energy grant unless its key was granted before.
    async fn apply_subscription_change(&self, change: &SubscriptionChangeDBRequest) -> Result<SubscriptionChangeOutcome>;

    /// Insert an unused invitation code. Returns false if the code already exists.
    async fn create_invitation_code(&self, code: &str) -> Result<bool>;

    /// Bind an unused code to `email` with a single conditional update.
    /// `email` is expected in normalized (trimmed, lowercase) form.
    async fn consume_invitation_code(&self, code: &str, email: &str) -> Result<InvitationConsumeOutcome>;
}
