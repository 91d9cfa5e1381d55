//! In-memory store implementation.
//!
//! All state sits behind one async mutex, so every trait operation is atomic with respect to
//! every other. Suitable for tests and single-process development; state is lost on restart.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::{
    Store,
    errors::{DbError, Result},
    models::{
        accounts::{AccountCreateDBRequest, AccountDBResponse},
        chat_turns::{ChatTurnCreateDBRequest, ChatTurnDBResponse, UsageCommitDBRequest, UsageCommitDBResponse},
        invitation_codes::{InvitationCodeDBResponse, InvitationConsumeOutcome},
        subscriptions::{ChangeDecision, SubscriptionChangeDBRequest, SubscriptionChangeOutcome, SubscriptionDBResponse},
    },
};
use crate::types::{AccountId, Tier};

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<AccountId, AccountDBResponse>,
    turns: Vec<ChatTurnDBResponse>,
    turn_index: HashMap<Uuid, usize>,
    subscriptions: HashMap<AccountId, SubscriptionDBResponse>,
    processed_events: HashMap<String, &'static str>,
    granted_keys: HashSet<String>,
    invitation_codes: HashMap<String, InvitationCodeDBResponse>,
}

impl MemoryState {
    fn insert_turn(&mut self, turn: &ChatTurnCreateDBRequest) -> Result<ChatTurnDBResponse> {
        if let Some(&idx) = self.turn_index.get(&turn.id) {
            return Ok(self.turns[idx].clone());
        }
        if !self.accounts.contains_key(&turn.account_id) {
            return Err(DbError::ForeignKeyViolation {
                constraint: Some("chat_turns_account_id_fkey".to_string()),
                table: Some("chat_turns".to_string()),
                message: format!("account {} does not exist", turn.account_id),
            });
        }

        let stored = ChatTurnDBResponse {
            seq: self.turns.len() as i64 + 1,
            id: turn.id,
            account_id: turn.account_id.clone(),
            role: turn.role,
            text: turn.text.clone(),
            input_tokens: turn.input_tokens,
            output_tokens: turn.output_tokens,
            total_tokens: turn.total_tokens,
            usd_cost: turn.usd_cost,
            energy_cost: turn.energy_cost,
            created_at: turn.created_at,
        };
        self.turn_index.insert(turn.id, self.turns.len());
        self.turns.push(stored.clone());
        Ok(stored)
    }
}

/// Process-local [`Store`]
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_account(&self, account_id: &str) -> Result<Option<AccountDBResponse>> {
        Ok(self.state.lock().await.accounts.get(account_id).cloned())
    }

    async fn get_or_create_account(&self, request: &AccountCreateDBRequest) -> Result<AccountDBResponse> {
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .entry(request.id.clone())
            .and_modify(|existing| existing.email = request.email.clone())
            .or_insert_with(|| AccountDBResponse {
                id: request.id.clone(),
                email: request.email.clone(),
                energy_balance: request.initial_balance,
                tier: Tier::None,
                customer_id: None,
                created_at: Utc::now(),
            });
        Ok(account.clone())
    }

    async fn find_account_by_customer(&self, customer_id: &str) -> Result<Option<AccountDBResponse>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn set_customer_id(&self, account_id: &str, customer_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let account = state.accounts.get_mut(account_id).ok_or(DbError::NotFound)?;
        account.customer_id = Some(customer_id.to_string());
        Ok(())
    }

    async fn list_recent_turns(&self, account_id: &str, limit: i64) -> Result<Vec<ChatTurnDBResponse>> {
        let state = self.state.lock().await;
        let mut turns: Vec<ChatTurnDBResponse> = state.turns.iter().filter(|t| t.account_id == account_id).cloned().collect();
        turns.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));

        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let skip = turns.len().saturating_sub(limit);
        Ok(turns.split_off(skip))
    }

    async fn append_turn(&self, turn: &ChatTurnCreateDBRequest) -> Result<ChatTurnDBResponse> {
        self.state.lock().await.insert_turn(turn)
    }

    async fn commit_usage(&self, commit: &UsageCommitDBRequest) -> Result<UsageCommitDBResponse> {
        let mut state = self.state.lock().await;

        // Check everything before the first write so a failure leaves no partial state
        let balance = state.accounts.get(&commit.account_id).ok_or(DbError::NotFound)?.energy_balance;
        if commit.debit < 0 {
            return Err(DbError::Other(anyhow::anyhow!("negative debit {}", commit.debit)));
        }
        if commit.debit > balance {
            return Err(DbError::BalanceWouldGoNegative {
                balance,
                debit: commit.debit,
            });
        }

        state.insert_turn(&commit.user_turn)?;
        let assistant_turn = state.insert_turn(&commit.assistant_turn)?;

        let account = state.accounts.get_mut(&commit.account_id).ok_or(DbError::NotFound)?;
        account.energy_balance -= commit.debit;

        Ok(UsageCommitDBResponse {
            balance_after: account.energy_balance,
            assistant_turn,
        })
    }

    async fn get_subscription(&self, account_id: &str) -> Result<Option<SubscriptionDBResponse>> {
        Ok(self.state.lock().await.subscriptions.get(account_id).cloned())
    }

    async fn apply_subscription_change(&self, change: &SubscriptionChangeDBRequest) -> Result<SubscriptionChangeOutcome> {
        let mut state = self.state.lock().await;

        if !state.accounts.contains_key(&change.account_id) {
            return Err(DbError::NotFound);
        }
        if state.processed_events.contains_key(&change.event_id) {
            return Ok(SubscriptionChangeOutcome::Duplicate);
        }

        let current = state.subscriptions.get(&change.account_id).cloned();
        let outcome = match change.decide(current.as_ref()) {
            ChangeDecision::Stale => Some(SubscriptionChangeOutcome::Stale),
            ChangeDecision::Superseded => Some(SubscriptionChangeOutcome::Superseded),
            ChangeDecision::Apply => None,
        };
        if let Some(outcome) = outcome {
            state.processed_events.insert(change.event_id.clone(), outcome.as_str());
            return Ok(outcome);
        }

        let customer_id = change
            .customer_id
            .clone()
            .or_else(|| current.as_ref().and_then(|c| c.customer_id.clone()));
        let last_event_at = match current.as_ref().and_then(|c| c.last_event_at) {
            Some(previous) => previous.max(change.event_created),
            None => change.event_created,
        };
        state.subscriptions.insert(
            change.account_id.clone(),
            SubscriptionDBResponse {
                account_id: change.account_id.clone(),
                subscription_id: Some(change.subscription_id.clone()),
                status: Some(change.status.clone()),
                price_id: change.price_id.clone(),
                current_period_end: change.current_period_end,
                customer_id: customer_id.clone(),
                last_event_at: Some(last_event_at),
                updated_at: Utc::now(),
            },
        );

        let newly_granted = match &change.grant {
            Some(grant) => state.granted_keys.insert(grant.grant_key.clone()).then_some(grant.amount),
            None => None,
        };

        let account = state.accounts.get_mut(&change.account_id).ok_or(DbError::NotFound)?;
        account.tier = change.tier;
        if let Some(customer_id) = customer_id {
            account.customer_id = Some(customer_id);
        }
        if change.zero_balance {
            account.energy_balance = 0;
        }
        let energy_granted = newly_granted.unwrap_or(0);
        account.energy_balance += energy_granted;
        let balance_after = account.energy_balance;

        let outcome = SubscriptionChangeOutcome::Applied {
            balance_after,
            energy_granted,
        };
        state.processed_events.insert(change.event_id.clone(), outcome.as_str());
        Ok(outcome)
    }

    async fn create_invitation_code(&self, code: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.invitation_codes.contains_key(code) {
            return Ok(false);
        }
        state.invitation_codes.insert(
            code.to_string(),
            InvitationCodeDBResponse {
                code: code.to_string(),
                is_used: false,
                used_by_email: None,
                used_at: None,
            },
        );
        Ok(true)
    }

    async fn consume_invitation_code(&self, code: &str, email: &str) -> Result<InvitationConsumeOutcome> {
        let mut state = self.state.lock().await;
        let Some(record) = state.invitation_codes.get_mut(code) else {
            return Ok(InvitationConsumeOutcome::NotFound);
        };

        if !record.is_used {
            record.is_used = true;
            record.used_by_email = Some(email.to_string());
            record.used_at = Some(Utc::now());
            return Ok(InvitationConsumeOutcome::Consumed);
        }

        if record.used_by_email.as_deref() == Some(email) {
            Ok(InvitationConsumeOutcome::AlreadyConsumedBySameEmail)
        } else {
            Ok(InvitationConsumeOutcome::UsedByAnotherEmail)
        }
    }
}
