use crate::db::errors::DbError;
use crate::model_providers::ModelError;
use crate::payment_providers::PaymentError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Credentials were provided but are not acceptable
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Worst-case cost of a chat request exceeds the caller's balance
    #[error("Insufficient energy: balance {current_balance}, estimated cost {estimated_cost}")]
    InsufficientBalance { current_balance: i64, estimated_cost: i64 },

    /// An external service (model or payment processor) failed
    #[error("Upstream {service} failed: {message}")]
    Upstream { service: &'static str, message: String },

    /// The usage commit would have driven the balance negative and was aborted.
    /// Carries the generated reply so the caller can still see it.
    #[error("Balance invariant violated for account {account_id}: debit {debit} exceeds balance {balance}")]
    InvariantViolation {
        account_id: String,
        balance: i64,
        debit: i64,
        reply: Option<String>,
    },

    /// Webhook delivery could not be authenticated or parsed
    #[error("Webhook verification failed: {message}")]
    WebhookVerification { message: String },

    /// Feature requires configuration that is absent
    #[error("{feature} is not configured")]
    NotConfigured { feature: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Payment processor error
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ModelError> for Error {
    fn from(err: ModelError) -> Self {
        Error::Upstream {
            service: "model",
            message: err.to_string(),
        }
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Error::InvariantViolation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::WebhookVerification { .. } => StatusCode::BAD_REQUEST,
            Error::NotConfigured { .. } => StatusCode::NOT_IMPLEMENTED,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                // Every other store failure is ours, not the caller's
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Payment(payment_err) => match payment_err {
                PaymentError::InvalidSignature(_) | PaymentError::InvalidData(_) => StatusCode::BAD_REQUEST,
                PaymentError::ProviderApi(_) => StatusCode::BAD_GATEWAY,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Forbidden { message } => message.clone(),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::InsufficientBalance { .. } => "Insufficient energy for this request".to_string(),
            Error::Upstream { service, .. } => format!("The {service} service is unavailable, please try again"),
            Error::InvariantViolation { .. } => "Your reply was generated but could not be saved".to_string(),
            Error::WebhookVerification { message } => message.clone(),
            Error::NotConfigured { feature } => format!("{feature} is not available"),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { .. } => "Resource already exists".to_string(),
                _ => "Database error occurred".to_string(),
            },
            Error::Payment(payment_err) => match payment_err {
                PaymentError::InvalidSignature(_) => "Invalid webhook signature".to_string(),
                PaymentError::InvalidData(message) => message.clone(),
                _ => "The payment service is unavailable, please try again".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::InvariantViolation { .. }
            | Error::Database(_)
            | Error::Internal { .. }
            | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Upstream { .. } | Error::Payment(PaymentError::ProviderApi(_)) => {
                tracing::warn!("Upstream error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. }
            | Error::NotFound { .. }
            | Error::InsufficientBalance { .. }
            | Error::WebhookVerification { .. }
            | Error::NotConfigured { .. }
            | Error::Payment(_) => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = match &self {
            Error::InsufficientBalance {
                current_balance,
                estimated_cost,
            } => json!({
                "error": self.user_message(),
                "currentBalance": current_balance,
                "estimatedCost": estimated_cost,
            }),
            Error::InvariantViolation { reply, .. } => json!({
                "error": self.user_message(),
                "reply": reply,
                "state_saved": false,
            }),
            _ => json!({ "error": self.user_message() }),
        };

        (status, Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(error: Error) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_insufficient_balance_body() {
        let (status, body) = body_json(Error::InsufficientBalance {
            current_balance: 100,
            estimated_cost: 150,
        })
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["currentBalance"], 100);
        assert_eq!(body["estimatedCost"], 150);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_invariant_violation_keeps_reply() {
        let (status, body) = body_json(Error::InvariantViolation {
            account_id: "acct".to_string(),
            balance: 5,
            debit: 10,
            reply: Some("hello".to_string()),
        })
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["reply"], "hello");
        assert_eq!(body["state_saved"], false);
    }

    #[tokio::test]
    async fn test_internal_details_not_leaked() {
        let (status, body) = body_json(Error::Other(anyhow::anyhow!("connection refused to 10.0.0.1"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
    }

    #[test]
    fn test_model_errors_are_bad_gateway() {
        let err: Error = ModelError::InvalidResponse("empty".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
