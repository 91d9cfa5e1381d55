//! Stripe payment provider implementation

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use stripe::{
    BillingPortalSession, CheckoutSession, CheckoutSessionMode, Client, CreateBillingPortalSession, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionSubscriptionData, CreateCustomer, CustomerId, EventObject, EventType, Expandable,
    InvoiceId, ListCustomers, Price, StripeError, Subscription, SubscriptionId, UpdateCustomer, Webhook,
};

use crate::{
    config::StripeConfig,
    payment_providers::{
        ACCOUNT_ID_METADATA_KEY, CheckoutCompleted, CheckoutRequest, Customer, PaymentError, PaymentProvider, Result, SubscriptionSnapshot,
        WebhookEvent, WebhookEventKind,
    },
};

/// Header carrying the `t=<unix>,v1=<hex>` signature on webhook deliveries
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Stripe payment provider
pub struct StripeProvider {
    client: Client,
    webhook_secret: String,
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> Result<Self> {
        let host = config.base_url.as_str().trim_end_matches('/');
        Ok(Self {
            client: Client::from_url(host, config.api_key),
            webhook_secret: config.webhook_secret,
        })
    }
}

fn api_error(context: &str, err: StripeError) -> PaymentError {
    tracing::error!("Stripe {} failed: {:?}", context, err);
    PaymentError::ProviderApi(format!("{context}: {err}"))
}

fn is_not_found(err: &StripeError) -> bool {
    matches!(err, StripeError::Stripe(request) if request.http_status == 404)
}

fn customer_id(id: &str) -> Result<CustomerId> {
    id.parse()
        .map_err(|_| PaymentError::InvalidData(format!("Invalid Stripe customer ID: {id}")))
}

fn account_metadata(account_id: &str) -> HashMap<String, String> {
    HashMap::from([(ACCOUNT_ID_METADATA_KEY.to_string(), account_id.to_string())])
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

// Stripe models optional fields differently across resources, so these read either shape.

trait MetadataMap {
    fn to_map(&self) -> HashMap<String, String>;
}

impl MetadataMap for HashMap<String, String> {
    fn to_map(&self) -> HashMap<String, String> {
        self.clone()
    }
}

impl<T: MetadataMap> MetadataMap for Option<T> {
    fn to_map(&self) -> HashMap<String, String> {
        self.as_ref().map(MetadataMap::to_map).unwrap_or_default()
    }
}

trait LinkedId {
    fn linked_id(&self) -> Option<String>;
}

impl LinkedId for Expandable<stripe::Customer> {
    fn linked_id(&self) -> Option<String> {
        Some(self.id().to_string())
    }
}

impl LinkedId for Expandable<Subscription> {
    fn linked_id(&self) -> Option<String> {
        Some(self.id().to_string())
    }
}

impl LinkedId for InvoiceId {
    fn linked_id(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl LinkedId for Price {
    fn linked_id(&self) -> Option<String> {
        Some(self.id.to_string())
    }
}

impl<T: LinkedId> LinkedId for Option<T> {
    fn linked_id(&self) -> Option<String> {
        self.as_ref().and_then(LinkedId::linked_id)
    }
}

trait UnixTime {
    fn unix_time(&self) -> Option<i64>;
}

impl UnixTime for i64 {
    fn unix_time(&self) -> Option<i64> {
        Some(*self)
    }
}

impl UnixTime for Option<i64> {
    fn unix_time(&self) -> Option<i64> {
        *self
    }
}

fn to_customer(customer: stripe::Customer) -> Customer {
    Customer {
        id: customer.id.to_string(),
        email: customer.email,
        deleted: customer.deleted,
        metadata: customer.metadata.to_map(),
    }
}

fn to_snapshot(subscription: &Subscription) -> SubscriptionSnapshot {
    let first_item = subscription.items.data.first();
    SubscriptionSnapshot {
        id: subscription.id.to_string(),
        customer_id: subscription.customer.linked_id(),
        status: subscription.status.as_str().to_string(),
        price_id: first_item.and_then(|item| item.price.linked_id()),
        current_period_end: subscription.current_period_end.unix_time().and_then(timestamp),
        metadata: subscription.metadata.to_map(),
    }
}

fn event_type_name(event_type: &EventType) -> String {
    match event_type {
        EventType::CheckoutSessionCompleted => "checkout.session.completed".to_string(),
        EventType::CustomerSubscriptionCreated => "customer.subscription.created".to_string(),
        EventType::CustomerSubscriptionUpdated => "customer.subscription.updated".to_string(),
        EventType::CustomerSubscriptionDeleted => "customer.subscription.deleted".to_string(),
        EventType::InvoicePaid => "invoice.paid".to_string(),
        other => format!("{other:?}"),
    }
}

/// Map a verified Stripe event onto the payloads the billing engine reacts to
fn to_event_kind(event_type: &EventType, object: &EventObject) -> WebhookEventKind {
    match (event_type, object) {
        (EventType::CheckoutSessionCompleted, EventObject::CheckoutSession(session)) => {
            let metadata_hint = session.metadata.to_map().remove(ACCOUNT_ID_METADATA_KEY);
            WebhookEventKind::CheckoutCompleted(CheckoutCompleted {
                session_id: session.id.to_string(),
                account_hint: metadata_hint.or_else(|| session.client_reference_id.clone()),
                customer_id: session.customer.linked_id(),
                subscription_id: session.subscription.linked_id(),
            })
        }
        (EventType::CustomerSubscriptionCreated | EventType::CustomerSubscriptionUpdated, EventObject::Subscription(subscription)) => {
            WebhookEventKind::SubscriptionUpdated(to_snapshot(subscription))
        }
        (EventType::CustomerSubscriptionDeleted, EventObject::Subscription(subscription)) => {
            WebhookEventKind::SubscriptionDeleted(to_snapshot(subscription))
        }
        (EventType::InvoicePaid, EventObject::Invoice(invoice)) => WebhookEventKind::InvoicePaid {
            invoice_id: invoice.id.linked_id().unwrap_or_default(),
            customer_id: invoice.customer.linked_id(),
            subscription_id: invoice.subscription.linked_id(),
        },
        _ => WebhookEventKind::Other,
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    #[tracing::instrument(skip(self))]
    async fn get_customer(&self, customer_id_str: &str) -> Result<Option<Customer>> {
        let id = customer_id(customer_id_str)?;
        match stripe::Customer::retrieve(&self.client, &id, &[]).await {
            Ok(customer) => Ok(Some(to_customer(customer))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(api_error("customer lookup", e)),
        }
    }

    #[tracing::instrument(skip(self, email))]
    async fn find_customers_by_email(&self, email: &str) -> Result<Vec<Customer>> {
        let params = ListCustomers {
            email: Some(email),
            limit: Some(10),
            ..Default::default()
        };
        let list = stripe::Customer::list(&self.client, &params)
            .await
            .map_err(|e| api_error("customer search", e))?;
        Ok(list.data.into_iter().map(to_customer).collect())
    }

    #[tracing::instrument(skip(self, email))]
    async fn create_customer(&self, email: &str, account_id: &str) -> Result<Customer> {
        let params = CreateCustomer {
            email: Some(email),
            metadata: Some(account_metadata(account_id)),
            ..Default::default()
        };
        let customer = stripe::Customer::create(&self.client, params)
            .await
            .map_err(|e| api_error("customer creation", e))?;
        tracing::info!("Created Stripe customer {} for account {}", customer.id, account_id);
        Ok(to_customer(customer))
    }

    #[tracing::instrument(skip(self))]
    async fn tag_customer(&self, customer_id_str: &str, account_id: &str) -> Result<()> {
        let id = customer_id(customer_id_str)?;
        let params = UpdateCustomer {
            metadata: Some(account_metadata(account_id)),
            ..Default::default()
        };
        stripe::Customer::update(&self.client, &id, params)
            .await
            .map_err(|e| api_error("customer update", e))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, request), fields(account_id = %request.account_id))]
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<String> {
        let checkout_params = CreateCheckoutSession {
            cancel_url: Some(request.cancel_url.as_str()),
            success_url: Some(request.success_url.as_str()),
            client_reference_id: Some(request.account_id.as_str()),
            customer: Some(customer_id(&request.customer_id)?),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(request.price_id.clone()),
                quantity: Some(1),
                ..Default::default()
            }]),
            mode: Some(CheckoutSessionMode::Subscription),
            metadata: Some(account_metadata(&request.account_id)),
            subscription_data: Some(CreateCheckoutSessionSubscriptionData {
                metadata: Some(account_metadata(&request.account_id)),
                ..Default::default()
            }),
            ..Default::default()
        };

        let checkout_session = CheckoutSession::create(&self.client, checkout_params)
            .await
            .map_err(|e| api_error("checkout session creation", e))?;
        tracing::info!(
            "Created checkout session {} for account {}",
            checkout_session.id,
            request.account_id
        );

        checkout_session.url.ok_or_else(|| {
            tracing::error!("Checkout session missing URL");
            PaymentError::ProviderApi("Checkout session missing URL".to_string())
        })
    }

    #[tracing::instrument(skip(self))]
    async fn create_billing_portal_session(&self, customer_id_str: &str, return_url: &str) -> Result<String> {
        let mut params = CreateBillingPortalSession::new(customer_id(customer_id_str)?);
        params.return_url = Some(return_url);
        let session = BillingPortalSession::create(&self.client, params)
            .await
            .map_err(|e| api_error("billing portal session creation", e))?;
        Ok(session.url)
    }

    #[tracing::instrument(skip(self))]
    async fn get_subscription(&self, subscription_id: &str) -> Result<SubscriptionSnapshot> {
        let id: SubscriptionId = subscription_id
            .parse()
            .map_err(|_| PaymentError::InvalidData(format!("Invalid Stripe subscription ID: {subscription_id}")))?;
        let subscription = Subscription::retrieve(&self.client, &id, &[])
            .await
            .map_err(|e| api_error("subscription lookup", e))?;
        Ok(to_snapshot(&subscription))
    }

    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<WebhookEvent> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .ok_or_else(|| PaymentError::InvalidSignature(format!("missing {SIGNATURE_HEADER} header")))?
            .to_str()
            .map_err(|_| PaymentError::InvalidSignature(format!("unreadable {SIGNATURE_HEADER} header")))?;

        // Checks the HMAC and rejects deliveries older than five minutes
        let event = Webhook::construct_event(body, signature, &self.webhook_secret).map_err(|e| {
            tracing::warn!("Failed to construct webhook event: {:?}", e);
            PaymentError::InvalidSignature(e.to_string())
        })?;

        tracing::trace!("Validated Stripe webhook event: {:?}", event.type_);

        let created = timestamp(event.created).ok_or_else(|| PaymentError::InvalidData(format!("invalid event time {}", event.created)))?;
        Ok(WebhookEvent {
            id: event.id.to_string(),
            event_type: event_type_name(&event.type_),
            created,
            kind: to_event_kind(&event.type_, &event.data.object),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path_regex},
    };

    fn config(base_url: &str) -> StripeConfig {
        StripeConfig {
            api_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_test".to_string(),
            base_url: base_url.parse().unwrap(),
        }
    }

    fn provider_for(server: &MockServer) -> StripeProvider {
        StripeProvider::new(config(&server.uri())).unwrap()
    }

    fn stripe_error(kind: &str, code: &str, message: &str) -> serde_json::Value {
        json!({"error": {"type": kind, "code": code, "message": message}})
    }

    #[test]
    fn test_stripe_provider_creation() {
        assert!(StripeProvider::new(config("https://api.stripe.com/")).is_ok());
    }

    #[tokio::test]
    async fn test_get_customer_not_found_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"/customers/cus_missing$"))
            .respond_with(ResponseTemplate::new(404).set_body_json(stripe_error(
                "invalid_request_error",
                "resource_missing",
                "No such customer: 'cus_missing'",
            )))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(provider_for(&server).get_customer("cus_missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_api_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"/subscriptions/sub_123$"))
            .respond_with(ResponseTemplate::new(401).set_body_json(stripe_error(
                "invalid_request_error",
                "api_key_expired",
                "Expired API Key provided",
            )))
            .mount(&server)
            .await;

        let err = provider_for(&server).get_subscription("sub_123").await.unwrap_err();
        assert!(matches!(err, PaymentError::ProviderApi(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_malformed_ids_never_reach_the_api() {
        let server = MockServer::start().await;
        let provider = provider_for(&server);

        assert!(matches!(provider.get_customer("acct_not_a_customer").await, Err(PaymentError::InvalidData(_))));
        assert!(matches!(provider.get_subscription("cus_123").await, Err(PaymentError::InvalidData(_))));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_requires_signature_header() {
        let provider = StripeProvider::new(config("https://api.stripe.com/")).unwrap();
        let err = provider.validate_webhook(&HeaderMap::new(), "{}").await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let provider = StripeProvider::new(config("https://api.stripe.com/")).unwrap();
        let mut headers = HeaderMap::new();
        let header = format!("t={},v1={}", Utc::now().timestamp(), "0".repeat(64));
        headers.insert(SIGNATURE_HEADER, header.parse().unwrap());

        let err = provider
            .validate_webhook(&headers, r#"{"id":"evt_1","type":"invoice.paid"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature(_)));
    }
}
