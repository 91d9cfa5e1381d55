//! Dummy payment provider implementation
//!
//! Keeps customers and subscriptions in memory. Webhook bodies are [`WebhookEvent`]s serialized
//! as JSON and signed with a hex HMAC-SHA256 of the body, so the full subscription lifecycle can
//! be driven locally by posting signed events. Useful for testing and development purposes.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::Mutex;

use crate::{
    config::DummyPaymentConfig,
    payment_providers::{
        ACCOUNT_ID_METADATA_KEY, CheckoutRequest, Customer, PaymentError, PaymentProvider, Result, SubscriptionSnapshot, WebhookEvent,
    },
};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw body
pub const SIGNATURE_HEADER: &str = "x-dummy-signature";

fn mac_for(secret: &str) -> Option<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes()).ok()
}

/// Sign a webhook body for delivery to the dummy provider
pub fn sign_payload(body: &str, secret: &str) -> Option<String> {
    let mut mac = mac_for(secret)?;
    mac.update(body.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn verify_signature(body: &str, signature: &str, secret: &str) -> bool {
    let (Ok(expected), Some(mut mac)) = (hex::decode(signature.trim()), mac_for(secret)) else {
        return false;
    };
    mac.update(body.as_bytes());
    // Constant-time comparison
    mac.verify_slice(&expected).is_ok()
}

#[derive(Default)]
struct DummyState {
    customers: HashMap<String, Customer>,
    subscriptions: HashMap<String, SubscriptionSnapshot>,
    next_customer: u64,
}

/// In-memory stand-in for the payment processor
pub struct DummyProvider {
    webhook_secret: String,
    state: Mutex<DummyState>,
}

impl From<DummyPaymentConfig> for DummyProvider {
    fn from(config: DummyPaymentConfig) -> Self {
        Self::new(config.webhook_secret)
    }
}

impl DummyProvider {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            state: Mutex::new(DummyState::default()),
        }
    }

    /// Register or replace a customer record
    pub async fn put_customer(&self, customer: Customer) {
        self.state.lock().await.customers.insert(customer.id.clone(), customer);
    }

    /// Mark a customer as deleted on the processor side
    pub async fn delete_customer(&self, customer_id: &str) {
        if let Some(customer) = self.state.lock().await.customers.get_mut(customer_id) {
            customer.deleted = true;
        }
    }

    /// Register or replace a subscription, as the processor would after a checkout or plan change
    pub async fn put_subscription(&self, subscription: SubscriptionSnapshot) {
        self.state.lock().await.subscriptions.insert(subscription.id.clone(), subscription);
    }

    pub async fn customer_count(&self) -> usize {
        self.state.lock().await.customers.len()
    }
}

#[async_trait]
impl PaymentProvider for DummyProvider {
    async fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>> {
        Ok(self.state.lock().await.customers.get(customer_id).cloned())
    }

    async fn find_customers_by_email(&self, email: &str) -> Result<Vec<Customer>> {
        let state = self.state.lock().await;
        let mut matches: Vec<Customer> = state
            .customers
            .values()
            .filter(|c| !c.deleted && c.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }

    async fn create_customer(&self, email: &str, account_id: &str) -> Result<Customer> {
        let mut state = self.state.lock().await;
        state.next_customer += 1;
        let customer = Customer {
            id: format!("cus_dummy_{}", state.next_customer),
            email: Some(email.to_string()),
            deleted: false,
            metadata: HashMap::from([(ACCOUNT_ID_METADATA_KEY.to_string(), account_id.to_string())]),
        };
        state.customers.insert(customer.id.clone(), customer.clone());
        tracing::info!("Dummy provider created customer {} for account {}", customer.id, account_id);
        Ok(customer)
    }

    async fn tag_customer(&self, customer_id: &str, account_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let customer = state
            .customers
            .get_mut(customer_id)
            .ok_or_else(|| PaymentError::ProviderApi(format!("No such customer: {customer_id}")))?;
        customer
            .metadata
            .insert(ACCOUNT_ID_METADATA_KEY.to_string(), account_id.to_string());
        Ok(())
    }

    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<String> {
        let session_id = format!("cs_dummy_{}", uuid::Uuid::new_v4().simple());
        tracing::info!(
            "Dummy provider created checkout session {} for account {}",
            session_id,
            request.account_id
        );
        // Payment is instantly "complete" for the dummy provider; the subscription itself only
        // changes once a signed event is posted to the webhook endpoint.
        Ok(request.success_url.replace("{CHECKOUT_SESSION_ID}", &session_id))
    }

    async fn create_billing_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String> {
        if !self.state.lock().await.customers.contains_key(customer_id) {
            return Err(PaymentError::ProviderApi(format!("No such customer: {customer_id}")));
        }
        Ok(return_url.to_string())
    }

    async fn get_subscription(&self, subscription_id: &str) -> Result<SubscriptionSnapshot> {
        self.state
            .lock()
            .await
            .subscriptions
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| PaymentError::ProviderApi(format!("No such subscription: {subscription_id}")))
    }

    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<WebhookEvent> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| PaymentError::InvalidSignature(format!("missing {SIGNATURE_HEADER} header")))?;
        if !verify_signature(body, signature, &self.webhook_secret) {
            return Err(PaymentError::InvalidSignature("signature does not match payload".to_string()));
        }
        serde_json::from_str(body).map_err(|e| PaymentError::InvalidData(format!("malformed event: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment_providers::WebhookEventKind;

    #[tokio::test]
    async fn test_customer_lifecycle() {
        let provider = DummyProvider::new("whsec_dummy");
        let created = provider.create_customer("a@example.com", "acct_a").await.unwrap();
        assert_eq!(created.account_tag(), Some("acct_a"));

        let found = provider.find_customers_by_email("A@example.com").await.unwrap();
        assert_eq!(found, vec![created.clone()]);

        provider.tag_customer(&created.id, "acct_b").await.unwrap();
        let fetched = provider.get_customer(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.account_tag(), Some("acct_b"));

        provider.delete_customer(&created.id).await;
        assert!(provider.find_customers_by_email("a@example.com").await.unwrap().is_empty());
        assert!(provider.get_customer(&created.id).await.unwrap().unwrap().deleted);
    }

    fn signed(body: &str, secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, sign_payload(body, secret).unwrap().parse().unwrap());
        headers
    }

    fn invoice_event() -> WebhookEvent {
        WebhookEvent {
            id: "evt_1".to_string(),
            event_type: "invoice.paid".to_string(),
            created: chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            kind: WebhookEventKind::InvoicePaid {
                invoice_id: "in_1".to_string(),
                customer_id: Some("cus_1".to_string()),
                subscription_id: Some("sub_1".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn test_signed_event_is_accepted() {
        let provider = DummyProvider::new("whsec_dummy");
        let body = serde_json::to_string(&invoice_event()).unwrap();

        let event = provider.validate_webhook(&signed(&body, "whsec_dummy"), &body).await.unwrap();
        assert_eq!(event, invoice_event());
    }

    #[tokio::test]
    async fn test_bad_or_missing_signature_is_rejected() {
        let provider = DummyProvider::new("whsec_dummy");
        let body = serde_json::to_string(&invoice_event()).unwrap();

        let wrong_secret = provider.validate_webhook(&signed(&body, "whsec_other"), &body).await;
        assert!(matches!(wrong_secret, Err(PaymentError::InvalidSignature(_))));

        let tampered = body.replace("sub_1", "sub_2");
        let tampered = provider.validate_webhook(&signed(&body, "whsec_dummy"), &tampered).await;
        assert!(matches!(tampered, Err(PaymentError::InvalidSignature(_))));

        let unsigned = provider.validate_webhook(&HeaderMap::new(), &body).await;
        assert!(matches!(unsigned, Err(PaymentError::InvalidSignature(_))));
    }

    #[tokio::test]
    async fn test_signed_garbage_is_invalid_data() {
        let provider = DummyProvider::new("whsec_dummy");
        let result = provider.validate_webhook(&signed("not json", "whsec_dummy"), "not json").await;
        assert!(matches!(result, Err(PaymentError::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_unknown_subscription_is_an_error() {
        let provider = DummyProvider::new("whsec_dummy");
        assert!(matches!(
            provider.get_subscription("sub_missing").await,
            Err(PaymentError::ProviderApi(_))
        ));
    }
}
