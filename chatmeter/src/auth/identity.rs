//! Bearer token verification for identity-provider issued JWTs.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::{config::AuthConfig, errors::Error, types::AccountId};

/// Claims the identity provider puts in its tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: AccountId, // Subject, becomes the account id
    pub email: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl IdentityClaims {
    /// Claims for `sub` valid for `ttl_secs`, stamped with the configured issuer and audience
    pub fn new(sub: impl Into<AccountId>, email: impl Into<String>, ttl_secs: i64, config: &AuthConfig) -> Self {
        Self {
            sub: sub.into(),
            email: email.into(),
            exp: Utc::now().timestamp() + ttl_secs,
            iss: config.issuer.clone(),
            aud: config.audience.clone(),
        }
    }
}

/// Verified caller identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub account_id: AccountId,
    pub email: String,
}

fn secret(config: &AuthConfig) -> Result<&str, Error> {
    config.jwt_secret.as_deref().ok_or_else(|| Error::Internal {
        operation: "verify bearer token: auth.jwt_secret is required".to_string(),
    })
}

/// Sign claims with the shared secret. Used for local development and tests; production tokens
/// come from the identity provider.
pub fn issue_token(claims: &IdentityClaims, config: &AuthConfig) -> Result<String, Error> {
    let key = EncodingKey::from_secret(secret(config)?.as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Verify a bearer token. Any token problem is `Forbidden`; key problems are internal.
pub fn verify_token(token: &str, config: &AuthConfig) -> Result<Identity, Error> {
    let key = DecodingKey::from_secret(secret(config)?.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = config.leeway_secs;
    if let Some(issuer) = &config.issuer {
        validation.set_issuer(&[issuer]);
    }
    match &config.audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }

    let token_data = decode::<IdentityClaims>(token, &key, &validation).map_err(|e| match e.kind() {
        ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::RsaFailedSigning
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::Crypto(_) => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },
        _ => Error::Forbidden {
            message: "Invalid or expired token".to_string(),
        },
    })?;

    let claims = token_data.claims;
    if claims.sub.trim().is_empty() {
        return Err(Error::Forbidden {
            message: "Token has no subject".to_string(),
        });
    }
    Ok(Identity {
        account_id: claims.sub,
        email: claims.email,
    })
}
