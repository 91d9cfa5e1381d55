//! Common type definitions shared across the billing engine.
//!
//! - [`AccountId`]: the identity-provider subject that owns an account
//! - [`Tier`]: subscription entitlement derived from processor events
//! - [`TurnRole`]: author of a persisted conversation turn

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Accounts are keyed by the identity provider's subject claim, which is an opaque string.
pub type AccountId = String;

/// Subscription tier of an account.
///
/// Only the subscription event processor writes this; everything else reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    None,
    Monthly,
    Annual,
}

impl Tier {
    pub fn is_entitled(&self) -> bool {
        !matches!(self, Tier::None)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::None => write!(f, "none"),
            Tier::Monthly => write!(f, "monthly"),
            Tier::Annual => write!(f, "annual"),
        }
    }
}

/// Author of a conversation turn. The persona preamble uses a separate system role
/// that never reaches storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Abbreviate an identifier to its first 8 characters for more readable logs
pub fn abbrev_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}
