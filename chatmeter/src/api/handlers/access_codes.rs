use axum::{Json, extract::State};

use crate::{
    AppState,
    api::models::access_codes::{AccessCodeVerify, AccessCodeVerifyResponse},
    errors::Result,
};

/// Check a one-time invitation code
#[utoipa::path(
    post,
    path = "/access-codes/verify",
    tag = "access",
    summary = "Verify an invitation code",
    description = "Consumes an unused code for the given email. A code already used by the same email verifies again; a code used by another email is rejected.",
    request_body = AccessCodeVerify,
    responses(
        (status = 200, description = "Verification result", body = AccessCodeVerifyResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn verify_access_code(
    State(state): State<AppState>,
    Json(request): Json<AccessCodeVerify>,
) -> Result<Json<AccessCodeVerifyResponse>> {
    let verdict = state.access_gate().verify(&request.email, &request.access_code).await?;
    Ok(Json(verdict.into()))
}
