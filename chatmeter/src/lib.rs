//! # chatmeter: metered conversation service
//!
//! `chatmeter` serves a single chat persona to signed-in users and bills every exchange against a
//! per-account **energy** balance. Energy is granted by subscriptions bought through a payment
//! processor; the processor's signed webhooks are the only thing that changes an account's tier.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum). Durable state lives behind the
//! [`db::Store`] trait, implemented over PostgreSQL for production and in memory for development
//! and tests. External services sit behind two more traits: [`model_providers::ModelProvider`]
//! for generation and [`payment_providers::PaymentProvider`] for the subscription processor.
//!
//! ### Chat flow (`POST /api/v1/chat`)
//!
//! 1. The bearer token is verified and the account fetched or created ([`auth`])
//! 2. Recent turns are loaded and the prompt assembled
//! 3. The worst-case cost is estimated and checked against the live balance; a request that
//!    could overdraw is rejected with 402 before the model is called
//! 4. The user turn is persisted, the model called, and the actual cost computed from the
//!    provider's usage figures
//! 5. The debit and the assistant turn are committed atomically
//!
//! ### Subscription flow (`POST /api/v1/webhooks/payments`)
//!
//! Deliveries are signature-checked, parsed, and applied exactly once per event id. Stale and
//! superseded events are recorded but change nothing. Each billing period's energy grant is
//! credited at most once, however many events report it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use chatmeter::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = chatmeter::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     chatmeter::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod billing;
pub mod config;
pub mod db;
pub mod errors;
mod metrics;
pub mod model_providers;
mod openapi;
pub mod payment_providers;
pub mod telemetry;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::sync::Arc;

use axum::{
    Router,
    http::{self, HeaderValue},
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    billing::{
        access::AccessGate,
        chat::ChatEngine,
        conversation::{ByteBoundTokenCounter, TokenCounter},
        customers::CustomerLinkResolver,
        subscriptions::SubscriptionEventProcessor,
    },
    config::StoreConfig,
    db::{InMemoryStore, PostgresStore, Store},
    errors::Error,
    model_providers::ModelProvider,
    openapi::ApiDoc,
    payment_providers::PaymentProvider,
};

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .store(store)
///     .model_provider(model)
///     .maybe_payment_provider(payments)
///     .token_counter(counter)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub model_provider: Arc<dyn ModelProvider>,
    /// Absent when no processor is configured; billing endpoints then answer 501
    pub payment_provider: Option<Arc<dyn PaymentProvider>>,
    pub token_counter: Arc<dyn TokenCounter>,
}

impl AppState {
    pub fn chat_engine(&self) -> ChatEngine {
        ChatEngine::new(
            self.store.clone(),
            self.model_provider.clone(),
            self.token_counter.clone(),
            self.config.pricing.clone(),
            self.config.chat.clone(),
        )
    }

    pub fn payment_provider(&self) -> Result<&Arc<dyn PaymentProvider>, Error> {
        self.payment_provider.as_ref().ok_or_else(|| Error::NotConfigured {
            feature: "Payments".to_string(),
        })
    }

    pub fn customer_resolver(&self) -> Result<CustomerLinkResolver, Error> {
        Ok(CustomerLinkResolver::new(self.store.clone(), self.payment_provider()?.clone()))
    }

    pub fn event_processor(&self) -> Result<SubscriptionEventProcessor, Error> {
        Ok(SubscriptionEventProcessor::new(
            self.store.clone(),
            self.payment_provider()?.clone(),
            self.config.plans.clone(),
            self.config.energy.zero_balance_on_cancel,
        ))
    }

    pub fn access_gate(&self) -> AccessGate {
        AccessGate::new(self.store.clone())
    }
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;
    let allow_origin = if cors_config.allowed_origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let origins = cors_config
            .allowed_origins
            .iter()
            .map(|origin| origin.trim_end_matches('/').parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_credentials(cors_config.allow_credentials);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// # Errors
///
/// Returns an error if the CORS configuration is invalid.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route("/chat", post(api::handlers::chat::send_message))
        .route("/chat/history", get(api::handlers::chat::get_history))
        .route("/account", get(api::handlers::account::get_account))
        .route("/billing/checkout", post(api::handlers::billing::create_checkout))
        .route("/billing/portal", post(api::handlers::billing::create_portal))
        .route("/webhooks/payments", post(api::handlers::webhooks::payment_webhook))
        .route("/access-codes/verify", post(api::handlers::access_codes::verify_access_code))
        .with_state(state.clone());

    let mut router = Router::new()
        .route("/healthz", get(api::handlers::health::healthz))
        .route("/api/openapi.json", get(|| async { axum::Json(ApiDoc::openapi()) }))
        .nest("/api/v1", api_routes)
        .merge(Scalar::with_url("/api/docs", ApiDoc::openapi()));

    if state.config.enable_metrics {
        router = router.route("/internal/metrics", get(api::handlers::health::prometheus_metrics));
    }

    let router = router.layer(create_cors_layer(&state.config)?).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Build the configured store, migrating PostgreSQL before first use
async fn setup_store(config: &StoreConfig) -> anyhow::Result<(Arc<dyn Store>, Option<PostgresStore>)> {
    match config {
        StoreConfig::Memory => {
            info!("Using in-memory store; state will be lost on restart");
            Ok((Arc::new(InMemoryStore::new()), None))
        }
        StoreConfig::Postgres { url, pool } => {
            let store = PostgresStore::connect(url, pool).await?;
            store.migrate().await?;
            info!("Connected to PostgreSQL and applied migrations");
            Ok((Arc::new(store.clone()), Some(store)))
        }
    }
}

/// Insert configured invitation codes that are not stored yet
async fn seed_access_codes(store: &dyn Store, codes: &[String]) -> anyhow::Result<()> {
    let mut created = 0;
    for code in codes.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
        if store.create_invitation_code(code).await? {
            created += 1;
        }
    }
    if created > 0 {
        info!("Seeded {} new access codes", created);
    }
    Ok(())
}

/// The assembled service.
///
/// 1. **Create**: [`Application::new`] connects the store, runs migrations, builds providers
///    and seeds access codes
/// 2. **Serve**: [`Application::serve`] binds the configured address and handles requests until
///    the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
    postgres: Option<PostgresStore>,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        debug!("Starting chatmeter with configuration: {:#?}", config);

        let (store, postgres) = setup_store(&config.store).await?;
        seed_access_codes(store.as_ref(), &config.access_codes).await?;

        let model_provider: Arc<dyn ModelProvider> = model_providers::create_provider(config.model.clone())?.into();
        let payment_provider: Option<Arc<dyn PaymentProvider>> = match config.payment.clone() {
            Some(payment) => Some(payment_providers::create_provider(payment)?.into()),
            None => {
                info!("No payment provider configured; billing endpoints are disabled");
                None
            }
        };
        let token_counter = Arc::new(ByteBoundTokenCounter::new(
            config.chat.per_turn_overhead_tokens,
            config.chat.reply_overhead_tokens,
        ));

        let state = AppState::builder()
            .config(config.clone())
            .store(store)
            .model_provider(model_provider)
            .maybe_payment_provider(payment_provider)
            .token_counter(token_counter)
            .build();
        let router = build_router(state)?;

        Ok(Self { router, config, postgres })
    }

    /// Consume the application into an in-process test server
    #[cfg(any(test, feature = "test-utils"))]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("chatmeter listening on http://{}", bind_addr);

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        if let Some(postgres) = self.postgres {
            info!("Closing database connections...");
            postgres.pool().close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_config;
    use axum::http::StatusCode;

    #[test_log::test(tokio::test)]
    async fn test_application_seeds_access_codes() {
        let mut config = create_test_config();
        config.access_codes = vec!["LAUNCH".to_string(), " ".to_string()];
        let server = Application::new(config).await.unwrap().into_test_server();

        let response: serde_json::Value = server
            .post("/api/v1/access-codes/verify")
            .json(&serde_json::json!({ "email": "a@example.com", "accessCode": "LAUNCH" }))
            .await
            .json();
        assert_eq!(response["verified"], true);
    }

    #[test_log::test(tokio::test)]
    async fn test_application_rejects_invalid_config() {
        let config = Config::default();
        assert!(Application::new(config).await.is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_docs_are_served() {
        let server = Application::new(create_test_config()).await.unwrap().into_test_server();
        server.get("/api/docs").await.assert_status_ok();

        let doc: serde_json::Value = server.get("/api/openapi.json").await.json();
        assert!(doc["paths"]["/chat"].is_object());
    }

    #[test]
    fn test_cors_wildcard_and_explicit_origins() {
        let mut config = create_test_config();
        config.cors.allowed_origins = vec!["*".to_string()];
        assert!(create_cors_layer(&config).is_ok());

        config.cors.allowed_origins = vec!["https://app.example.com/".to_string()];
        assert!(create_cors_layer(&config).is_ok());

        config.cors.allowed_origins = vec!["bad\norigin".to_string()];
        assert!(create_cors_layer(&config).is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_unknown_route_is_not_found() {
        let server = Application::new(create_test_config()).await.unwrap().into_test_server();
        server.get("/api/v1/nope").await.assert_status(StatusCode::NOT_FOUND);
    }
}
