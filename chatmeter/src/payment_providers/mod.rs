//! Payment provider abstraction layer
//!
//! This module defines the `PaymentProvider` trait which abstracts the subscription processor:
//! customer records, hosted checkout and billing portal sessions, subscription snapshots and
//! signed webhook delivery. The billing engine only ever talks to a `dyn PaymentProvider`.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PaymentConfig;

pub mod dummy;
pub mod stripe;

/// Metadata key used to tag a processor customer with the account that owns it.
pub const ACCOUNT_ID_METADATA_KEY: &str = "account_id";

/// Create a payment provider from configuration
///
/// This is the single point where we convert config into provider instances.
/// Adding a new provider requires adding a match arm here.
pub fn create_provider(config: PaymentConfig) -> Result<Box<dyn PaymentProvider>> {
    match config {
        PaymentConfig::Stripe(stripe_config) => Ok(Box::new(stripe::StripeProvider::new(stripe_config)?)),
        PaymentConfig::Dummy(dummy_config) => Ok(Box::new(dummy::DummyProvider::from(dummy_config))),
    }
}

/// Result type for payment provider operations
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors that can occur while talking to the payment processor
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    #[error("Invalid payment data: {0}")]
    InvalidData(String),

    #[error("Webhook signature rejected: {0}")]
    InvalidSignature(String),
}

/// A customer record held by the payment processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub id: String,
    pub email: Option<String>,
    pub deleted: bool,
    pub metadata: HashMap<String, String>,
}

impl Customer {
    /// The account id this customer is tagged with, if any
    pub fn account_tag(&self) -> Option<&str> {
        self.metadata.get(ACCOUNT_ID_METADATA_KEY).map(String::as_str)
    }
}

/// Point-in-time view of a subscription as the processor reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub id: String,
    pub customer_id: Option<String>,
    pub status: String,
    pub price_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

impl SubscriptionSnapshot {
    /// Processor statuses that grant access to the paid tier
    pub fn is_entitling(&self) -> bool {
        matches!(self.status.as_str(), "active" | "trialing")
    }

    pub fn account_hint(&self) -> Option<&str> {
        self.metadata.get(ACCOUNT_ID_METADATA_KEY).map(String::as_str)
    }
}

/// Completed hosted checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutCompleted {
    pub session_id: String,
    pub account_hint: Option<String>,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
}

/// The payloads the billing engine reacts to. Everything else is acknowledged and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WebhookEventKind {
    CheckoutCompleted(CheckoutCompleted),
    SubscriptionUpdated(SubscriptionSnapshot),
    SubscriptionDeleted(SubscriptionSnapshot),
    InvoicePaid {
        invoice_id: String,
        customer_id: Option<String>,
        subscription_id: Option<String>,
    },
    Other,
}

/// A verified webhook event from a payment provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Processor-assigned event id, used as the idempotency key
    pub id: String,
    /// Type of event (e.g., "checkout.session.completed")
    pub event_type: String,
    /// When the processor created the event, used to discard stale deliveries
    pub created: DateTime<Utc>,
    pub kind: WebhookEventKind,
}

/// Parameters for a hosted subscription checkout
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub account_id: String,
    pub customer_id: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Abstract payment provider interface
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Fetch a customer by id. Returns `None` when the processor has no such customer.
    async fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>>;

    /// List customers registered under an email address
    async fn find_customers_by_email(&self, email: &str) -> Result<Vec<Customer>>;

    /// Create a customer tagged with the owning account id
    async fn create_customer(&self, email: &str, account_id: &str) -> Result<Customer>;

    /// (Re)write the account tag in a customer's metadata
    async fn tag_customer(&self, customer_id: &str, account_id: &str) -> Result<()>;

    /// Create a hosted subscription checkout session.
    ///
    /// Returns a URL that the user should be redirected to for payment.
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<String>;

    /// Create a billing portal session for customer self-service.
    ///
    /// Returns a URL that the user should be redirected to for managing their subscription.
    async fn create_billing_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String>;

    /// Fetch the current state of a subscription
    async fn get_subscription(&self, subscription_id: &str) -> Result<SubscriptionSnapshot>;

    /// Validate the signature of a raw webhook delivery and parse it.
    ///
    /// Returns Err if validation fails (invalid signature, malformed data, etc.)
    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<WebhookEvent>;
}
