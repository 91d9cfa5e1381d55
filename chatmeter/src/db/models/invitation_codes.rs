//! Database models for one-time invitation codes.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationCodeDBResponse {
    pub code: String,
    pub is_used: bool,
    pub used_by_email: Option<String>,
    pub used_at: Option<DateTime<Utc>>,
}

/// Result of presenting a code for consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationConsumeOutcome {
    /// The code was unused and is now bound to the presenting email
    Consumed,
    /// The code was already bound to this email; nothing changed
    AlreadyConsumedBySameEmail,
    /// The code is bound to a different email
    UsedByAnotherEmail,
    NotFound,
}
