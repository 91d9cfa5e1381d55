//! Subscription lifecycle processing.
//!
//! Turns verified processor events into tier, energy and subscription-mirror changes. Every
//! change goes through [`Store::apply_subscription_change`], which records the event id in the
//! same atomic unit, so redelivered, reordered and concurrent events converge on one state.
//!
//! | Event                          | Snapshot source          | Effect                                  |
//! |--------------------------------|--------------------------|-----------------------------------------|
//! | `checkout.session.completed`   | fetched from processor   | tier, period grant, customer re-link    |
//! | `customer.subscription.updated`| embedded in event        | tier, period grant when entitled        |
//! | `customer.subscription.deleted`| embedded in event        | tier none, plan and period cleared      |
//! | `invoice.paid`                 | fetched from processor   | reconcile, period grant when entitled   |

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::billing::customers::CustomerLinkResolver;
use crate::config::PlansConfig;
use crate::db::{
    Store,
    models::{
        accounts::AccountDBResponse,
        subscriptions::{EnergyGrantDBRequest, SubscriptionChangeDBRequest, SubscriptionChangeOutcome},
    },
};
use crate::errors::Result;
use crate::metrics;
use crate::payment_providers::{PaymentProvider, SubscriptionSnapshot, WebhookEvent, WebhookEventKind};
use crate::types::{Tier, abbrev_id};

/// What processing an event did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    Applied {
        account_id: String,
        tier: Tier,
        energy_granted: i64,
        balance_after: i64,
    },
    /// Processed before under the same event id
    Duplicate,
    /// Older than the newest event already applied to the account
    Stale,
    /// Concerns a subscription the account has since replaced
    Superseded,
    /// Relevant event that could not be attributed or priced
    Skipped { reason: String },
    /// Event type the engine does not react to
    Ignored,
}

impl EventOutcome {
    /// Whether the event was taken into account. Duplicates and out-of-order events count, since
    /// their effect is already reflected in the stored state.
    pub fn handled(&self) -> bool {
        !matches!(self, EventOutcome::Skipped { .. } | EventOutcome::Ignored)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Applied { .. } => "applied",
            EventOutcome::Duplicate => "duplicate",
            EventOutcome::Stale => "stale",
            EventOutcome::Superseded => "superseded",
            EventOutcome::Skipped { .. } => "skipped",
            EventOutcome::Ignored => "ignored",
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionEventProcessor {
    store: Arc<dyn Store>,
    provider: Arc<dyn PaymentProvider>,
    customers: CustomerLinkResolver,
    plans: PlansConfig,
    zero_balance_on_cancel: bool,
}

impl SubscriptionEventProcessor {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn PaymentProvider>, plans: PlansConfig, zero_balance_on_cancel: bool) -> Self {
        Self {
            customers: CustomerLinkResolver::new(store.clone(), provider.clone()),
            store,
            provider,
            plans,
            zero_balance_on_cancel,
        }
    }

    #[instrument(skip_all, fields(event_id = %event.id, event_type = %event.event_type), err)]
    pub async fn process(&self, event: &WebhookEvent) -> Result<EventOutcome> {
        let outcome = match &event.kind {
            WebhookEventKind::CheckoutCompleted(checkout) => {
                let Some(subscription_id) = checkout.subscription_id.as_deref() else {
                    return Ok(self.skip(event, "checkout session has no subscription"));
                };
                let account = self
                    .resolve_account(checkout.account_hint.as_deref(), checkout.customer_id.as_deref())
                    .await?;
                let Some(account) = account else {
                    return Ok(self.skip(event, "checkout session could not be attributed to an account"));
                };
                let mut snapshot = self.provider.get_subscription(subscription_id).await?;
                if snapshot.customer_id.is_none() {
                    snapshot.customer_id = checkout.customer_id.clone();
                }

                let outcome = self.apply(event, &account, &snapshot, false).await?;
                if matches!(outcome, EventOutcome::Applied { .. })
                    && let Some(customer_id) = snapshot.customer_id.as_deref()
                {
                    self.relink_customer(customer_id, &account.id).await;
                }
                outcome
            }
            WebhookEventKind::SubscriptionUpdated(snapshot) => self.apply_snapshot(event, snapshot, false).await?,
            WebhookEventKind::SubscriptionDeleted(snapshot) => self.apply_snapshot(event, snapshot, true).await?,
            WebhookEventKind::InvoicePaid { subscription_id, .. } => {
                let Some(subscription_id) = subscription_id.as_deref() else {
                    // One-off invoices carry no subscription and change no entitlement
                    return Ok(self.record(event, EventOutcome::Ignored));
                };
                let snapshot = self.provider.get_subscription(subscription_id).await?;
                self.apply_snapshot(event, &snapshot, false).await?
            }
            WebhookEventKind::Other => EventOutcome::Ignored,
        };
        Ok(self.record(event, outcome))
    }

    async fn apply_snapshot(&self, event: &WebhookEvent, snapshot: &SubscriptionSnapshot, deleted: bool) -> Result<EventOutcome> {
        let account = self
            .resolve_account(snapshot.account_hint(), snapshot.customer_id.as_deref())
            .await?;
        match account {
            Some(account) => self.apply(event, &account, snapshot, deleted).await,
            None => Ok(EventOutcome::Skipped {
                reason: format!("subscription {} could not be attributed to an account", snapshot.id),
            }),
        }
    }

    async fn apply(
        &self,
        event: &WebhookEvent,
        account: &AccountDBResponse,
        snapshot: &SubscriptionSnapshot,
        deleted: bool,
    ) -> Result<EventOutcome> {
        let tier = if deleted || !snapshot.is_entitling() {
            Tier::None
        } else {
            match snapshot.price_id.as_deref().and_then(|price| self.plans.tier_for_price(price)) {
                Some(tier) => tier,
                None => {
                    return Ok(EventOutcome::Skipped {
                        reason: format!(
                            "subscription {} has unknown price {}",
                            snapshot.id,
                            snapshot.price_id.as_deref().unwrap_or("<none>")
                        ),
                    });
                }
            }
        };

        let grant = self
            .plans
            .plan(tier)
            .map(|plan| EnergyGrantDBRequest::for_period(&snapshot.id, snapshot.current_period_end, plan.energy_grant));

        let change = SubscriptionChangeDBRequest {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            event_created: event.created,
            account_id: account.id.clone(),
            subscription_id: snapshot.id.clone(),
            customer_id: snapshot.customer_id.clone(),
            status: snapshot.status.clone(),
            price_id: if deleted { None } else { snapshot.price_id.clone() },
            current_period_end: if deleted { None } else { snapshot.current_period_end },
            tier,
            grant,
            zero_balance: deleted && self.zero_balance_on_cancel,
        };

        Ok(match self.store.apply_subscription_change(&change).await? {
            SubscriptionChangeOutcome::Applied {
                balance_after,
                energy_granted,
            } => {
                if energy_granted > 0 {
                    metrics::record_energy_granted(tier, energy_granted);
                }
                info!(
                    "Account {} is now on tier {} (granted {}, balance {})",
                    abbrev_id(&account.id),
                    tier,
                    energy_granted,
                    balance_after
                );
                EventOutcome::Applied {
                    account_id: account.id.clone(),
                    tier,
                    energy_granted,
                    balance_after,
                }
            }
            SubscriptionChangeOutcome::Duplicate => EventOutcome::Duplicate,
            SubscriptionChangeOutcome::Stale => EventOutcome::Stale,
            SubscriptionChangeOutcome::Superseded => EventOutcome::Superseded,
        })
    }

    /// Account named by the event, else the account linked to the customer
    async fn resolve_account(&self, hint: Option<&str>, customer_id: Option<&str>) -> Result<Option<AccountDBResponse>> {
        if let Some(hint) = hint {
            if let Some(account) = self.store.get_account(hint).await? {
                return Ok(Some(account));
            }
            warn!("Event names unknown account {}", abbrev_id(hint));
        }
        match customer_id {
            Some(customer_id) => self.customers.account_for_customer(customer_id).await,
            None => Ok(None),
        }
    }

    /// Make sure the paying customer is tagged with the account. Failure only costs a fallback
    /// lookup later, so it does not fail the event.
    async fn relink_customer(&self, customer_id: &str, account_id: &str) {
        match self.provider.get_customer(customer_id).await {
            Ok(Some(customer)) if customer.account_tag() == Some(account_id) => {}
            Ok(_) => {
                if let Err(e) = self.provider.tag_customer(customer_id, account_id).await {
                    warn!("Failed to tag customer {}: {}", customer_id, e);
                }
            }
            Err(e) => warn!("Failed to fetch customer {}: {}", customer_id, e),
        }
    }

    fn skip(&self, event: &WebhookEvent, reason: &str) -> EventOutcome {
        self.record(
            event,
            EventOutcome::Skipped {
                reason: reason.to_string(),
            },
        )
    }

    fn record(&self, event: &WebhookEvent, outcome: EventOutcome) -> EventOutcome {
        if let EventOutcome::Skipped { reason } = &outcome {
            warn!("Skipped {} event {}: {}", event.event_type, event.id, reason);
        }
        metrics::record_webhook_outcome(&event.event_type, outcome.as_str());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryStore, models::accounts::AccountCreateDBRequest};
    use crate::payment_providers::{ACCOUNT_ID_METADATA_KEY, CheckoutCompleted, dummy::DummyProvider};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;

    struct Fixture {
        store: Arc<InMemoryStore>,
        provider: Arc<DummyProvider>,
        processor: SubscriptionEventProcessor,
    }

    async fn fixture(zero_balance_on_cancel: bool) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        store
            .get_or_create_account(&AccountCreateDBRequest {
                id: "acct_a".to_string(),
                email: "a@example.com".to_string(),
                initial_balance: 100,
            })
            .await
            .unwrap();
        let provider = Arc::new(DummyProvider::new("whsec_test"));
        let processor = SubscriptionEventProcessor::new(store.clone(), provider.clone(), PlansConfig::default(), zero_balance_on_cancel);
        Fixture {
            store,
            provider,
            processor,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn snapshot(id: &str, status: &str, price: &str, period_end: i64) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            id: id.to_string(),
            customer_id: Some("cus_a".to_string()),
            status: status.to_string(),
            price_id: Some(price.to_string()),
            current_period_end: Some(at(period_end)),
            metadata: HashMap::from([(ACCOUNT_ID_METADATA_KEY.to_string(), "acct_a".to_string())]),
        }
    }

    fn event(id: &str, created: i64, kind: WebhookEventKind) -> WebhookEvent {
        let event_type = match &kind {
            WebhookEventKind::CheckoutCompleted(_) => "checkout.session.completed",
            WebhookEventKind::SubscriptionUpdated(_) => "customer.subscription.updated",
            WebhookEventKind::SubscriptionDeleted(_) => "customer.subscription.deleted",
            WebhookEventKind::InvoicePaid { .. } => "invoice.paid",
            WebhookEventKind::Other => "customer.created",
        };
        WebhookEvent {
            id: id.to_string(),
            event_type: event_type.to_string(),
            created: at(created),
            kind,
        }
    }

    fn checkout(subscription_id: &str) -> WebhookEventKind {
        WebhookEventKind::CheckoutCompleted(CheckoutCompleted {
            session_id: "cs_1".to_string(),
            account_hint: Some("acct_a".to_string()),
            customer_id: Some("cus_a".to_string()),
            subscription_id: Some(subscription_id.to_string()),
        })
    }

    async fn balance_and_tier(f: &Fixture) -> (i64, Tier) {
        let account = f.store.get_account("acct_a").await.unwrap().unwrap();
        (account.energy_balance, account.tier)
    }

    #[tokio::test]
    async fn test_checkout_grants_monthly_energy() {
        let f = fixture(false).await;
        f.provider
            .put_subscription(snapshot("sub_1", "active", "price_monthly", 2_000))
            .await;

        let outcome = f.processor.process(&event("evt_1", 100, checkout("sub_1"))).await.unwrap();
        assert!(outcome.handled());
        assert_eq!(balance_and_tier(&f).await, (100 + 50_000, Tier::Monthly));

        let record = f.store.get_subscription("acct_a").await.unwrap().unwrap();
        assert_eq!(record.status.as_deref(), Some("active"));
        assert_eq!(record.subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(
            f.store.get_account("acct_a").await.unwrap().unwrap().customer_id.as_deref(),
            Some("cus_a")
        );
    }

    #[tokio::test]
    async fn test_replay_changes_nothing() {
        let f = fixture(false).await;
        f.provider
            .put_subscription(snapshot("sub_1", "active", "price_monthly", 2_000))
            .await;
        let checkout_event = event("evt_1", 100, checkout("sub_1"));

        f.processor.process(&checkout_event).await.unwrap();
        let after_first = balance_and_tier(&f).await;
        let replay = f.processor.process(&checkout_event).await.unwrap();

        assert_eq!(replay, EventOutcome::Duplicate);
        assert!(replay.handled());
        assert_eq!(balance_and_tier(&f).await, after_first);
    }

    #[tokio::test]
    async fn test_checkout_and_invoice_for_same_period_grant_once() {
        let f = fixture(false).await;
        f.provider
            .put_subscription(snapshot("sub_1", "active", "price_annual", 2_000))
            .await;

        f.processor.process(&event("evt_inv", 99, WebhookEventKind::InvoicePaid {
            invoice_id: "in_1".to_string(),
            customer_id: Some("cus_a".to_string()),
            subscription_id: Some("sub_1".to_string()),
        }))
        .await
        .unwrap();
        f.processor.process(&event("evt_co", 100, checkout("sub_1"))).await.unwrap();

        assert_eq!(balance_and_tier(&f).await, (100 + 700_000, Tier::Annual));
    }

    #[tokio::test]
    async fn test_renewal_grants_next_period() {
        let f = fixture(false).await;
        let first = snapshot("sub_1", "active", "price_monthly", 2_000);
        let renewed = snapshot("sub_1", "active", "price_monthly", 4_000);

        f.processor
            .process(&event("evt_1", 100, WebhookEventKind::SubscriptionUpdated(first)))
            .await
            .unwrap();
        f.processor
            .process(&event("evt_2", 2_100, WebhookEventKind::SubscriptionUpdated(renewed)))
            .await
            .unwrap();

        assert_eq!(balance_and_tier(&f).await, (100 + 2 * 50_000, Tier::Monthly));
    }

    #[tokio::test]
    async fn test_deletion_clears_plan_and_keeps_balance() {
        let f = fixture(false).await;
        let active = snapshot("sub_1", "active", "price_monthly", 2_000);
        f.processor
            .process(&event("evt_1", 100, WebhookEventKind::SubscriptionUpdated(active)))
            .await
            .unwrap();

        let deleted = snapshot("sub_1", "canceled", "price_monthly", 2_000);
        f.processor
            .process(&event("evt_2", 200, WebhookEventKind::SubscriptionDeleted(deleted)))
            .await
            .unwrap();

        assert_eq!(balance_and_tier(&f).await, (100 + 50_000, Tier::None));
        let record = f.store.get_subscription("acct_a").await.unwrap().unwrap();
        assert_eq!(record.price_id, None);
        assert_eq!(record.current_period_end, None);
        assert_eq!(record.status.as_deref(), Some("canceled"));
    }

    #[tokio::test]
    async fn test_deletion_can_zero_balance() {
        let f = fixture(true).await;
        let deleted = snapshot("sub_1", "canceled", "price_monthly", 2_000);
        f.processor
            .process(&event("evt_1", 100, WebhookEventKind::SubscriptionDeleted(deleted)))
            .await
            .unwrap();
        assert_eq!(balance_and_tier(&f).await, (0, Tier::None));
    }

    #[tokio::test]
    async fn test_out_of_order_cancel_does_not_revoke() {
        let f = fixture(false).await;
        let active = snapshot("sub_1", "active", "price_monthly", 2_000);
        f.processor
            .process(&event("evt_2", 200, WebhookEventKind::SubscriptionUpdated(active)))
            .await
            .unwrap();

        let older = snapshot("sub_1", "canceled", "price_monthly", 2_000);
        let outcome = f
            .processor
            .process(&event("evt_1", 100, WebhookEventKind::SubscriptionDeleted(older)))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Stale);
        assert_eq!(balance_and_tier(&f).await.1, Tier::Monthly);
    }

    #[tokio::test]
    async fn test_cancel_of_replaced_subscription_is_superseded() {
        let f = fixture(false).await;
        let replacement = snapshot("sub_new", "active", "price_annual", 9_000);
        f.processor
            .process(&event("evt_1", 100, WebhookEventKind::SubscriptionUpdated(replacement)))
            .await
            .unwrap();

        let old = snapshot("sub_old", "canceled", "price_monthly", 2_000);
        let outcome = f
            .processor
            .process(&event("evt_2", 200, WebhookEventKind::SubscriptionDeleted(old)))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Superseded);
        assert_eq!(balance_and_tier(&f).await.1, Tier::Annual);
    }

    #[tokio::test]
    async fn test_unknown_price_is_skipped() {
        let f = fixture(false).await;
        let unknown = snapshot("sub_1", "active", "price_enterprise", 2_000);
        let outcome = f
            .processor
            .process(&event("evt_1", 100, WebhookEventKind::SubscriptionUpdated(unknown)))
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Skipped { .. }));
        assert!(!outcome.handled());
        assert_eq!(balance_and_tier(&f).await, (100, Tier::None));
    }

    #[tokio::test]
    async fn test_unattributable_event_is_skipped() {
        let f = fixture(false).await;
        let mut orphan = snapshot("sub_1", "active", "price_monthly", 2_000);
        orphan.metadata.clear();
        orphan.customer_id = Some("cus_nobody".to_string());

        let outcome = f
            .processor
            .process(&event("evt_1", 100, WebhookEventKind::SubscriptionUpdated(orphan)))
            .await
            .unwrap();
        assert!(!outcome.handled());
    }

    #[tokio::test]
    async fn test_other_events_are_ignored() {
        let f = fixture(false).await;
        let outcome = f.processor.process(&event("evt_1", 100, WebhookEventKind::Other)).await.unwrap();
        assert_eq!(outcome, EventOutcome::Ignored);
    }
}
