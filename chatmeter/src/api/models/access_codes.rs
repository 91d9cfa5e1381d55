use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::billing::access::AccessVerdict;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessCodeVerify {
    pub email: String,
    pub access_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccessCodeVerifyResponse {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<AccessVerdict> for AccessCodeVerifyResponse {
    fn from(verdict: AccessVerdict) -> Self {
        Self {
            verified: verdict.verified,
            error: verdict.error,
        }
    }
}
