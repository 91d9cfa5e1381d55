use axum::{Json, extract::State, http::HeaderMap};
use tracing::{error, info};

use crate::{
    AppState,
    api::models::billing::WebhookAck,
    errors::{Error, Result},
};

/// Receive a signed event from the payment processor
#[utoipa::path(
    post,
    path = "/webhooks/payments",
    tag = "billing",
    summary = "Payment processor webhook",
    description = "Verifies the delivery signature and applies the subscription change. Redelivered events are acknowledged without effect.",
    request_body(content = String, description = "Raw event payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Event received", body = WebhookAck),
        (status = 400, description = "Bad signature or payload"),
        (status = 500, description = "Processing failed; the processor should retry"),
        (status = 501, description = "No payment provider configured"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn payment_webhook(State(state): State<AppState>, headers: HeaderMap, body: String) -> Result<Json<WebhookAck>> {
    let provider = state.payment_provider()?;
    let event = provider
        .validate_webhook(&headers, &body)
        .await
        .map_err(|e| Error::WebhookVerification { message: e.to_string() })?;

    info!("Received {} event {}", event.event_type, event.id);
    let outcome = state.event_processor()?.process(&event).await.map_err(|e| {
        error!("Failed to process {} event {}: {:#}", event.event_type, event.id, e);
        Error::Internal {
            operation: format!("process payment event {}", event.id),
        }
    })?;

    Ok(Json(WebhookAck {
        received: true,
        handled: outcome.handled(),
    }))
}
