//! Database models for accounts.

use crate::types::{AccountId, Tier};
use chrono::{DateTime, Utc};

/// Database request for creating an account on first sight of an identity
#[derive(Debug, Clone)]
pub struct AccountCreateDBRequest {
    pub id: AccountId,
    pub email: String,
    pub initial_balance: i64,
}

/// Database response for an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDBResponse {
    pub id: AccountId,
    pub email: String,
    pub energy_balance: i64,
    pub tier: Tier,
    pub customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
