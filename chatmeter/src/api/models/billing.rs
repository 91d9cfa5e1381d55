use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::Tier;

/// Purchasable plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Monthly,
    Annual,
}

impl From<Plan> for Tier {
    fn from(plan: Plan) -> Self {
        match plan {
            Plan::Monthly => Tier::Monthly,
            Plan::Annual => Tier::Annual,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutCreate {
    pub plan: Plan,
}

/// Where to send the user next
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RedirectResponse {
    pub url: String,
}

/// Acknowledgement returned to the payment processor
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    /// Whether the event changed, or was already reflected in, account state
    pub handled: bool,
}
