//! One-time invitation code check.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::db::{Store, models::invitation_codes::InvitationConsumeOutcome};
use crate::errors::Result;

/// Result of presenting an invitation code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessVerdict {
    pub verified: bool,
    pub error: Option<String>,
}

impl AccessVerdict {
    fn granted() -> Self {
        Self {
            verified: true,
            error: None,
        }
    }

    fn denied(message: &str) -> Self {
        Self {
            verified: false,
            error: Some(message.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct AccessGate {
    store: Arc<dyn Store>,
}

impl AccessGate {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Verify `code` for `email`, consuming it on first use.
    ///
    /// A code already bound to the same email verifies again without being re-consumed.
    #[instrument(skip_all, err)]
    pub async fn verify(&self, email: &str, code: &str) -> Result<AccessVerdict> {
        let email = normalize_email(email);
        let code = code.trim();
        if email.is_empty() || code.is_empty() {
            return Ok(AccessVerdict::denied("Email and access code are required"));
        }

        Ok(match self.store.consume_invitation_code(code, &email).await? {
            InvitationConsumeOutcome::Consumed => {
                info!("Invitation code consumed");
                AccessVerdict::granted()
            }
            InvitationConsumeOutcome::AlreadyConsumedBySameEmail => AccessVerdict::granted(),
            InvitationConsumeOutcome::UsedByAnotherEmail => AccessVerdict::denied("This access code has already been used"),
            InvitationConsumeOutcome::NotFound => AccessVerdict::denied("Invalid access code"),
        })
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;

    async fn gate_with_code(code: &str) -> AccessGate {
        let store = Arc::new(InMemoryStore::new());
        store.create_invitation_code(code).await.unwrap();
        AccessGate::new(store)
    }

    #[tokio::test]
    async fn test_code_is_single_use_across_emails() {
        let gate = gate_with_code("WELCOME").await;

        assert!(gate.verify("a@example.com", "WELCOME").await.unwrap().verified);
        // Same person again, differently formatted
        assert!(gate.verify("  A@Example.com ", "WELCOME").await.unwrap().verified);

        let other = gate.verify("b@example.com", "WELCOME").await.unwrap();
        assert!(!other.verified);
        assert!(other.error.is_some());
    }

    #[tokio::test]
    async fn test_unknown_code_is_rejected() {
        let gate = gate_with_code("WELCOME").await;
        let verdict = gate.verify("a@example.com", "NOPE").await.unwrap();
        assert_eq!(verdict, AccessVerdict::denied("Invalid access code"));
    }

    #[tokio::test]
    async fn test_blank_input_is_rejected() {
        let gate = gate_with_code("WELCOME").await;
        assert!(!gate.verify("", "WELCOME").await.unwrap().verified);
        assert!(!gate.verify("a@example.com", "  ").await.unwrap().verified);
    }
}
