//! Atomic commit of a billed exchange.

use std::sync::Arc;

use tracing::{error, instrument};

use crate::db::{
    Store,
    errors::DbError,
    models::chat_turns::{ChatTurnDBResponse, UsageCommitDBRequest},
};
use crate::errors::{Error, Result};
use crate::metrics;

/// What a successful commit left behind
#[derive(Debug, Clone)]
pub struct UsageReceipt {
    pub balance_after: i64,
    pub assistant_turn: ChatTurnDBResponse,
}

#[derive(Clone)]
pub struct UsageRecorder {
    store: Arc<dyn Store>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Debit the balance and append both turns in one store transaction.
    ///
    /// If the debit would take the balance below zero nothing is written and
    /// [`Error::InvariantViolation`] is returned carrying the assistant text.
    #[instrument(skip_all, fields(account_id = %commit.account_id, debit = commit.debit), err)]
    pub async fn record(&self, commit: UsageCommitDBRequest) -> Result<UsageReceipt> {
        match self.store.commit_usage(&commit).await {
            Ok(receipt) => {
                metrics::record_energy_debited(commit.debit);
                Ok(UsageReceipt {
                    balance_after: receipt.balance_after,
                    assistant_turn: receipt.assistant_turn,
                })
            }
            Err(DbError::BalanceWouldGoNegative { balance, .. }) => Err(self.invariant_violation(commit, balance)),
            Err(err) if err.is_balance_check() => {
                let balance = self
                    .store
                    .get_account(&commit.account_id)
                    .await?
                    .map(|account| account.energy_balance)
                    .unwrap_or_default();
                Err(self.invariant_violation(commit, balance))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn invariant_violation(&self, commit: UsageCommitDBRequest, balance: i64) -> Error {
        metrics::record_balance_invariant_violation();
        error!(
            account_id = %commit.account_id,
            balance,
            debit = commit.debit,
            "Usage commit aborted: debit would take balance below zero"
        );
        Error::InvariantViolation {
            account_id: commit.account_id,
            balance,
            debit: commit.debit,
            reply: Some(commit.assistant_turn.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use crate::db::models::{accounts::AccountCreateDBRequest, chat_turns::ChatTurnCreateDBRequest};
    use rust_decimal::Decimal;

    async fn recorder_with_balance(balance: i64) -> (UsageRecorder, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store
            .get_or_create_account(&AccountCreateDBRequest {
                id: "acct".to_string(),
                email: "a@example.com".to_string(),
                initial_balance: balance,
            })
            .await
            .unwrap();
        (UsageRecorder::new(store.clone()), store)
    }

    fn commit(debit: i64) -> UsageCommitDBRequest {
        UsageCommitDBRequest {
            account_id: "acct".to_string(),
            user_turn: ChatTurnCreateDBRequest::user("acct", "question"),
            assistant_turn: ChatTurnCreateDBRequest::assistant("acct", "answer", 20, 5, 25, Decimal::new(5, 5), debit),
            debit,
        }
    }

    #[tokio::test]
    async fn test_record_debits_balance() {
        let (recorder, _) = recorder_with_balance(50).await;
        let receipt = recorder.record(commit(20)).await.unwrap();
        assert_eq!(receipt.balance_after, 30);
        assert_eq!(receipt.assistant_turn.energy_cost, 20);
    }

    #[tokio::test]
    async fn test_overdraft_surfaces_invariant_violation_with_reply() {
        let (recorder, store) = recorder_with_balance(10).await;
        let err = recorder.record(commit(11)).await.unwrap_err();
        match err {
            Error::InvariantViolation { balance, debit, reply, .. } => {
                assert_eq!(balance, 10);
                assert_eq!(debit, 11);
                assert_eq!(reply.as_deref(), Some("answer"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.get_account("acct").await.unwrap().unwrap().energy_balance, 10);
        assert!(store.list_recent_turns("acct", 10).await.unwrap().is_empty());
    }
}
