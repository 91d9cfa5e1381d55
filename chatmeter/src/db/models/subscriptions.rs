//! Database models for the subscription mirror and the bookkeeping that keeps webhook
//! processing idempotent.

use crate::types::{AccountId, Tier};
use chrono::{DateTime, Utc};

/// Database response for an account's subscription mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionDBResponse {
    pub account_id: AccountId,
    pub subscription_id: Option<String>,
    pub status: Option<String>,
    pub price_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub customer_id: Option<String>,
    /// Creation time of the newest processor event applied to this record
    pub last_event_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Energy to credit at most once per `grant_key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnergyGrantDBRequest {
    pub grant_key: String,
    pub amount: i64,
}

impl EnergyGrantDBRequest {
    /// One grant per subscription billing period
    pub fn for_period(subscription_id: &str, period_end: Option<DateTime<Utc>>, amount: i64) -> Self {
        let period = period_end.map(|t| t.timestamp().to_string()).unwrap_or_else(|| "open".to_string());
        Self {
            grant_key: format!("{subscription_id}:{period}"),
            amount,
        }
    }
}

/// A processor event reduced to the state it implies for one account.
///
/// Status, price and period are absolute values from the processor's snapshot, never deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionChangeDBRequest {
    pub event_id: String,
    pub event_type: String,
    pub event_created: DateTime<Utc>,
    pub account_id: AccountId,
    pub subscription_id: String,
    pub customer_id: Option<String>,
    pub status: String,
    pub price_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub tier: Tier,
    pub grant: Option<EnergyGrantDBRequest>,
    pub zero_balance: bool,
}

/// Whether a change may be applied on top of the current record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDecision {
    Apply,
    /// Older than the newest event already applied
    Stale,
    /// Revokes a subscription the account has since replaced
    Superseded,
}

impl SubscriptionChangeDBRequest {
    pub fn decide(&self, current: Option<&SubscriptionDBResponse>) -> ChangeDecision {
        let Some(current) = current else {
            return ChangeDecision::Apply;
        };

        if let Some(last_event_at) = current.last_event_at
            && self.event_created < last_event_at
        {
            return ChangeDecision::Stale;
        }

        let other_subscription_on_record = current
            .subscription_id
            .as_deref()
            .is_some_and(|id| id != self.subscription_id);
        if !self.tier.is_entitled() && other_subscription_on_record {
            return ChangeDecision::Superseded;
        }

        ChangeDecision::Apply
    }
}

/// What applying a change did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChangeOutcome {
    Applied { balance_after: i64, energy_granted: i64 },
    /// The event id was processed before; nothing changed
    Duplicate,
    Stale,
    Superseded,
}

impl SubscriptionChangeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionChangeOutcome::Applied { .. } => "applied",
            SubscriptionChangeOutcome::Duplicate => "duplicate",
            SubscriptionChangeOutcome::Stale => "stale",
            SubscriptionChangeOutcome::Superseded => "superseded",
        }
    }
}
