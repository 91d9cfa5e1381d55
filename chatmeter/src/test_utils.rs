//! Test utilities for integration testing (available with `test-utils` feature).

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use axum_test::{TestResponse, TestServer};
use chrono::{DateTime, TimeZone, Utc};

use crate::{
    AppState,
    auth::identity::{IdentityClaims, issue_token},
    billing::conversation::ByteBoundTokenCounter,
    config::{AuthConfig, Config, DummyPaymentConfig, PaymentConfig},
    db::{InMemoryStore, models::accounts::AccountCreateDBRequest},
    model_providers::{ChatMessage, Generation, ModelError, ModelProvider, TokenUsage},
    payment_providers::{
        ACCOUNT_ID_METADATA_KEY, CheckoutCompleted, SubscriptionSnapshot, WebhookEvent, WebhookEventKind,
        dummy::{self, DummyProvider},
    },
};

pub use crate::db::Store;

pub const TEST_JWT_SECRET: &str = "test-jwt-secret";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test";

/// Model that returns a fixed reply and usage, recording every prompt it is sent
pub struct ScriptedModelProvider {
    reply: Option<String>,
    usage: TokenUsage,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<Vec<ChatMessage>>>,
}

impl ScriptedModelProvider {
    pub fn new(reply: impl Into<String>, input_tokens: i64, output_tokens: i64) -> Self {
        Self {
            reply: Some(reply.into()),
            usage: TokenUsage {
                input_tokens,
                output_tokens,
                total_tokens: input_tokens + output_tokens,
            },
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    /// A model whose every call fails
    pub fn failing() -> Self {
        Self {
            reply: None,
            ..Self::new("", 0, 0)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<Vec<ChatMessage>> {
        self.last_prompt.lock().unwrap().clone()
    }
}

impl Default for ScriptedModelProvider {
    fn default() -> Self {
        Self::new("Hello from the test model", 50, 20)
    }
}

#[async_trait]
impl ModelProvider for ScriptedModelProvider {
    async fn generate(&self, messages: &[ChatMessage], _max_output_tokens: i64) -> crate::model_providers::Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(messages.to_vec());
        match &self.reply {
            Some(text) => Ok(Generation {
                text: text.clone(),
                usage: self.usage,
            }),
            None => Err(ModelError::Api {
                status: 503,
                body: "model overloaded".to_string(),
            }),
        }
    }
}

pub fn create_test_config() -> Config {
    Config {
        auth: AuthConfig {
            jwt_secret: Some(TEST_JWT_SECRET.to_string()),
            ..Default::default()
        },
        payment: Some(PaymentConfig::Dummy(DummyPaymentConfig {
            webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
        })),
        ..Default::default()
    }
}

fn build_state(config: Config, store: Arc<InMemoryStore>, model: Arc<dyn ModelProvider>, payment: Option<Arc<DummyProvider>>) -> AppState {
    let counter = ByteBoundTokenCounter::new(config.chat.per_turn_overhead_tokens, config.chat.reply_overhead_tokens);
    AppState::builder()
        .config(config)
        .store(store)
        .model_provider(model)
        .maybe_payment_provider(payment.map(|p| p as Arc<dyn crate::payment_providers::PaymentProvider>))
        .token_counter(Arc::new(counter))
        .build()
}

/// App state over an in-memory store, a scripted model and the dummy payment provider
pub fn create_test_state() -> (AppState, Arc<InMemoryStore>) {
    let config = create_test_config();
    let store = Arc::new(InMemoryStore::new());
    let payment = Arc::new(DummyProvider::new(TEST_WEBHOOK_SECRET));
    let state = build_state(config, store.clone(), Arc::new(ScriptedModelProvider::default()), Some(payment));
    (state, store)
}

/// Authorization header value for a token signed with the test secret
pub fn bearer(config: &Config, sub: &str, email: &str) -> String {
    let claims = IdentityClaims::new(sub, email, 3600, &config.auth);
    let token = issue_token(&claims, &config.auth).expect("Failed to sign test token");
    format!("Bearer {token}")
}

pub struct TestApp {
    pub server: TestServer,
    pub store: Arc<InMemoryStore>,
    pub payment: Arc<DummyProvider>,
    pub config: Config,
    model: Arc<ScriptedModelProvider>,
}

pub struct TestAppBuilder {
    config: Config,
    model: ScriptedModelProvider,
    payments: bool,
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder {
            config: create_test_config(),
            model: ScriptedModelProvider::default(),
            payments: true,
        }
    }

    pub fn bearer(&self, sub: &str) -> String {
        bearer(&self.config, sub, &format!("{sub}@example.com"))
    }

    pub fn model_calls(&self) -> usize {
        self.model.calls()
    }

    /// Create the account the way the first authenticated request would
    pub async fn create_account(&self, sub: &str) {
        self.store
            .get_or_create_account(&AccountCreateDBRequest {
                id: sub.to_string(),
                email: format!("{sub}@example.com"),
                initial_balance: self.config.energy.initial_balance,
            })
            .await
            .expect("Failed to create test account");
    }

    pub async fn balance(&self, sub: &str) -> i64 {
        self.store
            .get_account(sub)
            .await
            .expect("Failed to read test account")
            .expect("Test account does not exist")
            .energy_balance
    }

    /// Post an event to the webhook endpoint, signed with the test secret
    pub async fn post_webhook(&self, event: &WebhookEvent) -> TestResponse {
        let body = serde_json::to_string(event).expect("Failed to serialize test event");
        let signature = dummy::sign_payload(&body, TEST_WEBHOOK_SECRET).expect("Failed to sign test event");
        self.server
            .post("/api/v1/webhooks/payments")
            .add_header(dummy::SIGNATURE_HEADER, signature)
            .text(body)
            .await
    }
}

impl TestAppBuilder {
    pub fn initial_balance(mut self, balance: i64) -> Self {
        self.config.energy.initial_balance = balance;
        self
    }

    pub fn model(mut self, model: ScriptedModelProvider) -> Self {
        self.model = model;
        self
    }

    pub fn without_payments(mut self) -> Self {
        self.config.payment = None;
        self.payments = false;
        self
    }

    pub fn access_codes(mut self, codes: Vec<String>) -> Self {
        self.config.access_codes = codes;
        self
    }

    pub fn enable_metrics(mut self, enabled: bool) -> Self {
        self.config.enable_metrics = enabled;
        self
    }

    pub async fn build(self) -> TestApp {
        let store = Arc::new(InMemoryStore::new());
        for code in &self.config.access_codes {
            store.create_invitation_code(code).await.expect("Failed to seed access code");
        }

        let payment = Arc::new(DummyProvider::new(TEST_WEBHOOK_SECRET));
        let model = Arc::new(self.model);
        let state = build_state(
            self.config.clone(),
            store.clone(),
            model.clone(),
            self.payments.then(|| payment.clone()),
        );
        let router = crate::build_router(state).expect("Failed to build router");
        let server = TestServer::new(router).expect("Failed to create test server");

        TestApp {
            server,
            store,
            payment,
            config: self.config,
            model,
        }
    }
}

fn period_end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
}

/// A subscription on customer `cus_test` tagged with `account_id`
pub fn subscription_snapshot(subscription_id: &str, account_id: &str, status: &str, price_id: &str) -> SubscriptionSnapshot {
    SubscriptionSnapshot {
        id: subscription_id.to_string(),
        customer_id: Some("cus_test".to_string()),
        status: status.to_string(),
        price_id: Some(price_id.to_string()),
        current_period_end: Some(period_end()),
        metadata: HashMap::from([(ACCOUNT_ID_METADATA_KEY.to_string(), account_id.to_string())]),
    }
}

fn event_time(created: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(created, 0).expect("Invalid test event time")
}

/// A completed checkout by `account_id` on customer `cus_test`
pub fn checkout_completed_event(event_id: &str, account_id: &str, subscription_id: &str, created: i64) -> WebhookEvent {
    WebhookEvent {
        id: event_id.to_string(),
        event_type: "checkout.session.completed".to_string(),
        created: event_time(created),
        kind: WebhookEventKind::CheckoutCompleted(CheckoutCompleted {
            session_id: format!("cs_{event_id}"),
            account_hint: Some(account_id.to_string()),
            customer_id: Some("cus_test".to_string()),
            subscription_id: Some(subscription_id.to_string()),
        }),
    }
}

/// A `customer.subscription.*` event carrying `snapshot`
pub fn subscription_event(event_id: &str, event_type: &str, snapshot: SubscriptionSnapshot, created: i64) -> WebhookEvent {
    let kind = if event_type == "customer.subscription.deleted" {
        WebhookEventKind::SubscriptionDeleted(snapshot)
    } else {
        WebhookEventKind::SubscriptionUpdated(snapshot)
    };
    WebhookEvent {
        id: event_id.to_string(),
        event_type: event_type.to_string(),
        created: event_time(created),
        kind,
    }
}

/// An event the billing engine does not react to
pub fn unhandled_event(event_id: &str, event_type: &str, created: i64) -> WebhookEvent {
    WebhookEvent {
        id: event_id.to_string(),
        event_type: event_type.to_string(),
        created: event_time(created),
        kind: WebhookEventKind::Other,
    }
}
