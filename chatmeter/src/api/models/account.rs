use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::{accounts::AccountDBResponse, subscriptions::SubscriptionDBResponse};
use crate::types::Tier;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub subscription_id: Option<String>,
    pub status: Option<String>,
    pub price_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<SubscriptionDBResponse> for SubscriptionResponse {
    fn from(record: SubscriptionDBResponse) -> Self {
        Self {
            subscription_id: record.subscription_id,
            status: record.status,
            price_id: record.price_id,
            current_period_end: record.current_period_end,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub id: String,
    pub email: String,
    pub energy_balance: i64,
    pub tier: Tier,
    pub subscription: Option<SubscriptionResponse>,
    pub created_at: DateTime<Utc>,
}

impl AccountResponse {
    pub fn new(account: AccountDBResponse, subscription: Option<SubscriptionDBResponse>) -> Self {
        Self {
            id: account.id,
            email: account.email,
            energy_balance: account.energy_balance,
            tier: account.tier,
            subscription: subscription.map(Into::into),
            created_at: account.created_at,
        }
    }
}
