//! Chat request orchestration.
//!
//! ```text
//! validate → load history → assemble → estimate worst case → guard
//!          → persist user turn → model call → actual cost → commit
//! ```
//!
//! Nothing is debited before the model answers. A failed model call leaves only the user turn
//! behind, and the commit re-checks the live balance instead of trusting the admission check.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

use crate::billing::{
    conversation::{self, TokenCounter},
    guard::{self, Admission},
    pricing::CostEstimator,
    recorder::UsageRecorder,
};
use crate::config::{ChatConfig, PricingConfig};
use crate::db::{
    Store,
    models::{
        accounts::AccountDBResponse,
        chat_turns::{ChatTurnCreateDBRequest, ChatTurnDBResponse, UsageCommitDBRequest},
    },
};
use crate::errors::{Error, Result};
use crate::metrics;
use crate::model_providers::ModelProvider;
use crate::types::abbrev_id;

/// Usage and cost of one exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    #[schema(value_type = String)]
    pub usd: Decimal,
    pub energy: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub reply: String,
    pub updated_balance: i64,
    pub usage: ChatUsage,
}

#[derive(Clone)]
pub struct ChatEngine {
    store: Arc<dyn Store>,
    model: Arc<dyn ModelProvider>,
    estimator: CostEstimator,
    recorder: UsageRecorder,
    settings: ChatConfig,
}

impl ChatEngine {
    pub fn new(
        store: Arc<dyn Store>,
        model: Arc<dyn ModelProvider>,
        counter: Arc<dyn TokenCounter>,
        pricing: PricingConfig,
        settings: ChatConfig,
    ) -> Self {
        Self {
            recorder: UsageRecorder::new(store.clone()),
            estimator: CostEstimator::new(pricing, counter),
            store,
            model,
            settings,
        }
    }

    #[instrument(skip_all, fields(account_id = %abbrev_id(&account.id)), err)]
    pub async fn respond(&self, account: &AccountDBResponse, message: &str) -> Result<ChatReply> {
        self.validate(message)?;

        let history = self.store.list_recent_turns(&account.id, self.settings.max_history_turns).await?;
        let messages = conversation::assemble(&history, message);
        let estimate = self.estimator.estimate(&messages, self.settings.max_output_tokens);

        if let Admission::Reject {
            reason,
            current_balance,
            required_energy,
        } = guard::authorize(account.energy_balance, estimate.worst_case_energy)
        {
            debug!("Rejected chat request: {}", reason);
            metrics::record_chat_outcome("rejected");
            return Err(Error::InsufficientBalance {
                current_balance,
                estimated_cost: required_energy,
            });
        }

        // Persisted before the model call so the message survives a model failure
        let user_turn = ChatTurnCreateDBRequest::user(account.id.clone(), message);
        self.store.append_turn(&user_turn).await?;

        let generation = match self.model.generate(&messages, self.settings.max_output_tokens).await {
            Ok(generation) => generation,
            Err(e) => {
                warn!("Model call failed: {}", e);
                metrics::record_chat_outcome("model_failed");
                return Err(e.into());
            }
        };

        let usage = generation.usage;
        let cost = self.estimator.actual_cost(usage.input_tokens, usage.output_tokens);
        if cost.energy > estimate.worst_case_energy {
            warn!(
                "Actual cost {} exceeded worst-case estimate {} ({} input tokens reported, {} estimated)",
                cost.energy, estimate.worst_case_energy, usage.input_tokens, estimate.input_tokens
            );
        }

        let assistant_turn = ChatTurnCreateDBRequest::assistant(
            account.id.clone(),
            generation.text.clone(),
            usage.input_tokens,
            usage.output_tokens,
            usage.total_tokens,
            cost.usd,
            cost.energy,
        );
        let receipt = match self
            .recorder
            .record(UsageCommitDBRequest {
                account_id: account.id.clone(),
                user_turn,
                assistant_turn,
                debit: cost.energy,
            })
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                metrics::record_chat_outcome("commit_failed");
                return Err(e);
            }
        };
        metrics::record_chat_outcome("completed");

        Ok(ChatReply {
            reply: generation.text,
            updated_balance: receipt.balance_after,
            usage: ChatUsage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                total_tokens: usage.total_tokens,
                usd: cost.usd,
                energy: cost.energy,
            },
        })
    }

    /// The caller's persisted ledger, oldest first. The persona preamble is never part of it.
    pub async fn history(&self, account_id: &str, limit: i64) -> Result<Vec<ChatTurnDBResponse>> {
        Ok(self.store.list_recent_turns(account_id, limit).await?)
    }

    fn validate(&self, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            return Err(Error::BadRequest {
                message: "Message must not be empty".to_string(),
            });
        }
        if message.chars().count() > self.settings.max_message_chars {
            return Err(Error::BadRequest {
                message: format!("Message exceeds {} characters", self.settings.max_message_chars),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::conversation::ByteBoundTokenCounter;
    use crate::db::{InMemoryStore, models::accounts::AccountCreateDBRequest};
    use crate::model_providers::{ChatMessage, Generation, MessageRole, TokenUsage};
    use crate::test_utils::ScriptedModelProvider;
    use crate::types::TurnRole;
    use async_trait::async_trait;
    use tokio::sync::Barrier;

    struct Fixture<M> {
        store: Arc<InMemoryStore>,
        model: Arc<M>,
        engine: ChatEngine,
    }

    async fn fixture<M: ModelProvider + 'static>(model: M, balance: i64) -> Fixture<M> {
        let store = Arc::new(InMemoryStore::new());
        store
            .get_or_create_account(&AccountCreateDBRequest {
                id: "acct".to_string(),
                email: "a@example.com".to_string(),
                initial_balance: balance,
            })
            .await
            .unwrap();
        let model = Arc::new(model);
        let settings = ChatConfig::default();
        let engine = ChatEngine::new(
            store.clone(),
            model.clone(),
            counter(&settings),
            PricingConfig::default(),
            settings,
        );
        Fixture { store, model, engine }
    }

    fn counter(settings: &ChatConfig) -> Arc<dyn TokenCounter> {
        Arc::new(ByteBoundTokenCounter::new(settings.per_turn_overhead_tokens, settings.reply_overhead_tokens))
    }

    fn estimator() -> CostEstimator {
        CostEstimator::new(PricingConfig::default(), counter(&ChatConfig::default()))
    }

    async fn account<M>(f: &Fixture<M>) -> AccountDBResponse {
        f.store.get_account("acct").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_exchange_is_billed_and_persisted() {
        let f = fixture(ScriptedModelProvider::new("hello there", 1_000, 200), 1_000).await;

        let reply = f.engine.respond(&account(&f).await, "hi").await.unwrap();
        // 1000 * 1.25/M + 200 * 5/M = $0.00225 -> 22.5 energy -> 23
        assert_eq!(reply.usage.energy, 23);
        assert_eq!(reply.usage.usd, Decimal::new(225, 5));
        assert_eq!(reply.updated_balance, 1_000 - 23);
        assert_eq!(reply.reply, "hello there");

        let turns = f.engine.history("acct", 10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[0].energy_cost, 0);
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[1].energy_cost, 23);
        assert_eq!(f.model.calls(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_balance_skips_model() {
        let f = fixture(ScriptedModelProvider::new("unused", 10, 10), 1).await;

        let err = f.engine.respond(&account(&f).await, "hi").await.unwrap_err();
        match err {
            Error::InsufficientBalance {
                current_balance,
                estimated_cost,
            } => {
                assert_eq!(current_balance, 1);
                assert!(estimated_cost > 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(f.model.calls(), 0);
        assert!(f.engine.history("acct", 10).await.unwrap().is_empty());
        assert_eq!(account(&f).await.energy_balance, 1);
    }

    #[tokio::test]
    async fn test_model_failure_keeps_user_turn_and_balance() {
        let f = fixture(ScriptedModelProvider::failing(), 1_000).await;

        let err = f.engine.respond(&account(&f).await, "are you there?").await.unwrap_err();
        assert!(matches!(err, Error::Upstream { service: "model", .. }));

        let turns = f.engine.history("acct", 10).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, "are you there?");
        assert_eq!(account(&f).await.energy_balance, 1_000);
        assert_eq!(f.model.calls(), 1);
    }

    #[tokio::test]
    async fn test_history_feeds_next_prompt() {
        let f = fixture(ScriptedModelProvider::new("ok", 10, 1), 1_000).await;
        f.engine.respond(&account(&f).await, "first").await.unwrap();
        f.engine.respond(&account(&f).await, "second").await.unwrap();

        let prompt = f.model.last_prompt().unwrap();
        let contents: Vec<&str> = prompt.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(&contents[conversation::PERSONA.len()..], ["first", "ok", "second"]);
    }

    #[tokio::test]
    async fn test_rejects_empty_and_oversized_messages() {
        let f = fixture(ScriptedModelProvider::new("ok", 10, 1), 1_000).await;
        let acct = account(&f).await;

        assert!(matches!(f.engine.respond(&acct, "   ").await, Err(Error::BadRequest { .. })));
        let long = "x".repeat(ChatConfig::default().max_message_chars + 1);
        assert!(matches!(f.engine.respond(&acct, &long).await, Err(Error::BadRequest { .. })));
        assert_eq!(f.model.calls(), 0);
    }

    #[tokio::test]
    async fn test_multibyte_message_billed_within_estimate() {
        let settings = ChatConfig::default();
        let message = "漢".repeat(3_000);
        let estimate = estimator().estimate(&conversation::assemble(&[], &message), settings.max_output_tokens);

        // The provider bills more input tokens than there are characters, and the full output cap
        let model = ScriptedModelProvider::new("好", 3_100, settings.max_output_tokens);
        let f = fixture(model, estimate.worst_case_energy).await;

        let reply = f.engine.respond(&account(&f).await, &message).await.unwrap();
        assert!(reply.usage.energy <= estimate.worst_case_energy);
        assert_eq!(reply.updated_balance, estimate.worst_case_energy - reply.usage.energy);
        assert!(account(&f).await.energy_balance >= 0);
    }

    /// Holds each caller at the barrier until both are in flight, then bills the full output cap
    struct LockstepModel {
        barrier: Barrier,
    }

    #[async_trait]
    impl ModelProvider for LockstepModel {
        async fn generate(&self, _messages: &[ChatMessage], max_output_tokens: i64) -> crate::model_providers::Result<Generation> {
            self.barrier.wait().await;
            Ok(Generation {
                text: "done".to_string(),
                usage: TokenUsage {
                    input_tokens: 0,
                    output_tokens: max_output_tokens,
                    total_tokens: max_output_tokens,
                },
            })
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_from_stale_snapshot_never_overdraw() {
        let settings = ChatConfig::default();
        let est = estimator();
        let cost = est.actual_cost(0, settings.max_output_tokens).energy;
        // Enough for either request's worst case, not for both debits
        let balance = 2 * cost - 1;
        let mut second_prompt = conversation::assemble(&[], "hi");
        second_prompt.push(ChatMessage::new(MessageRole::User, "hi"));
        assert!(est.estimate(&second_prompt, settings.max_output_tokens).worst_case_energy <= balance);

        let f = fixture(LockstepModel { barrier: Barrier::new(2) }, balance).await;
        let stale = account(&f).await;

        let (first, second) = tokio::join!(f.engine.respond(&stale, "hi"), f.engine.respond(&stale, "hi"));

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        let failure = outcomes.into_iter().find_map(|r| r.err()).unwrap();
        match failure {
            Error::InvariantViolation { balance: seen, debit, reply, .. } => {
                assert_eq!(seen, balance - cost);
                assert_eq!(debit, cost);
                assert_eq!(reply.as_deref(), Some("done"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let final_balance = account(&f).await.energy_balance;
        assert_eq!(final_balance, balance - cost);
        assert!(final_balance >= 0);
    }
}
