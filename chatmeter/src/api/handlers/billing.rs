use axum::{Json, extract::State};
use tracing::info;

use crate::{
    AppState,
    api::models::billing::{CheckoutCreate, RedirectResponse},
    auth::current_account::CurrentAccount,
    errors::{Error, Result},
    payment_providers::CheckoutRequest,
    types::{Tier, abbrev_id},
};

/// Start a hosted subscription checkout
#[utoipa::path(
    post,
    path = "/billing/checkout",
    tag = "billing",
    summary = "Create checkout session",
    description = "Resolves the caller's payment customer and returns the hosted checkout URL for the chosen plan.",
    request_body = CheckoutCreate,
    responses(
        (status = 200, description = "Checkout URL", body = RedirectResponse),
        (status = 401, description = "No bearer token"),
        (status = 403, description = "Invalid bearer token"),
        (status = 501, description = "No payment provider configured"),
        (status = 502, description = "Payment provider unavailable"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_checkout(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Json(request): Json<CheckoutCreate>,
) -> Result<Json<RedirectResponse>> {
    let provider = state.payment_provider()?;
    let tier = Tier::from(request.plan);
    let plan = state.config.plans.plan(tier).ok_or_else(|| Error::BadRequest {
        message: format!("Unknown plan {tier}"),
    })?;

    let customer_id = state.customer_resolver()?.resolve(&account).await?;
    let dashboard = state.config.dashboard_url.trim_end_matches('/');
    let url = provider
        .create_checkout_session(&CheckoutRequest {
            account_id: account.id.clone(),
            customer_id,
            price_id: plan.price_id.clone(),
            success_url: format!("{dashboard}/billing?checkout=success&session_id={{CHECKOUT_SESSION_ID}}"),
            cancel_url: format!("{dashboard}/billing?checkout=cancelled"),
        })
        .await?;

    info!("Created {} checkout for account {}", tier, abbrev_id(&account.id));
    Ok(Json(RedirectResponse { url }))
}

/// Open the payment provider's self-service portal
#[utoipa::path(
    post,
    path = "/billing/portal",
    tag = "billing",
    summary = "Create billing portal session",
    responses(
        (status = 200, description = "Portal URL", body = RedirectResponse),
        (status = 401, description = "No bearer token"),
        (status = 403, description = "Invalid bearer token"),
        (status = 501, description = "No payment provider configured"),
        (status = 502, description = "Payment provider unavailable"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_portal(State(state): State<AppState>, CurrentAccount(account): CurrentAccount) -> Result<Json<RedirectResponse>> {
    let provider = state.payment_provider()?;
    let customer_id = state.customer_resolver()?.resolve(&account).await?;
    let return_url = format!("{}/billing", state.config.dashboard_url.trim_end_matches('/'));
    let url = provider.create_billing_portal_session(&customer_id, &return_url).await?;
    Ok(Json(RedirectResponse { url }))
}

#[cfg(test)]
mod tests {
    use crate::api::models::billing::RedirectResponse;
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test_log::test(tokio::test)]
    async fn test_checkout_links_customer_once() {
        let app = TestApp::builder().build().await;

        for _ in 0..2 {
            let redirect: RedirectResponse = app
                .server
                .post("/api/v1/billing/checkout")
                .add_header("authorization", app.bearer("user-1"))
                .json(&json!({ "plan": "monthly" }))
                .await
                .json();
            assert!(redirect.url.contains("checkout=success"));
            assert!(!redirect.url.contains("{CHECKOUT_SESSION_ID}"));
        }

        assert_eq!(app.payment.customer_count().await, 1);
        let account = app.store.get_account("user-1").await.unwrap().unwrap();
        assert!(account.customer_id.is_some());
    }

    #[test_log::test(tokio::test)]
    async fn test_portal_returns_to_dashboard() {
        let app = TestApp::builder().build().await;
        let redirect: RedirectResponse = app
            .server
            .post("/api/v1/billing/portal")
            .add_header("authorization", app.bearer("user-1"))
            .await
            .json();
        assert!(redirect.url.ends_with("/billing"));
    }

    #[test_log::test(tokio::test)]
    async fn test_unknown_plan_is_rejected() {
        let app = TestApp::builder().build().await;
        let response = app
            .server
            .post("/api/v1/billing/checkout")
            .add_header("authorization", app.bearer("user-1"))
            .json(&json!({ "plan": "lifetime" }))
            .await;
        assert!(response.status_code().is_client_error());
    }

    #[test_log::test(tokio::test)]
    async fn test_checkout_without_payment_provider() {
        let app = TestApp::builder().without_payments().build().await;
        app.server
            .post("/api/v1/billing/checkout")
            .add_header("authorization", app.bearer("user-1"))
            .json(&json!({ "plan": "annual" }))
            .await
            .assert_status(StatusCode::NOT_IMPLEMENTED);
    }
}
