//! Extractor for the authenticated caller's account.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{instrument, trace};

use crate::{
    AppState,
    auth::identity::{Identity, verify_token},
    billing::access::normalize_email,
    db::models::accounts::{AccountCreateDBRequest, AccountDBResponse},
    errors::{Error, Result},
};

/// The caller's account, created with the initial balance on first sight of an identity
#[derive(Debug, Clone)]
pub struct CurrentAccount(pub AccountDBResponse);

/// Bearer token from the `Authorization` header. `None` if absent or not a bearer credential.
fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

impl FromRequestParts<AppState> for Identity {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let Some(token) = bearer_token(parts) else {
            trace!("No bearer token on request");
            return Err(Error::Unauthenticated { message: None });
        };
        verify_token(token, &state.config.auth)
    }
}

impl FromRequestParts<AppState> for CurrentAccount {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let identity = Identity::from_request_parts(parts, state).await?;
        let account = state
            .store
            .get_or_create_account(&AccountCreateDBRequest {
                id: identity.account_id,
                email: normalize_email(&identity.email),
                initial_balance: state.config.energy.initial_balance,
            })
            .await?;
        Ok(CurrentAccount(account))
    }
}
