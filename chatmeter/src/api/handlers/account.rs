use axum::{Json, extract::State};

use crate::{AppState, api::models::account::AccountResponse, auth::current_account::CurrentAccount, errors::Result};

/// Balance, tier and subscription state of the caller
#[utoipa::path(
    get,
    path = "/account",
    tag = "account",
    summary = "Get the current account",
    responses(
        (status = 200, description = "Account state", body = AccountResponse),
        (status = 401, description = "No bearer token"),
        (status = 403, description = "Invalid bearer token"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_account(State(state): State<AppState>, CurrentAccount(account): CurrentAccount) -> Result<Json<AccountResponse>> {
    let subscription = state.store.get_subscription(&account.id).await?;
    Ok(Json(AccountResponse::new(account, subscription)))
}
