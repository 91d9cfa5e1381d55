use axum::{
    http::{StatusCode, header},
    response::IntoResponse,
};

use crate::{errors::Error, metrics};

/// Liveness check
pub async fn healthz() -> &'static str {
    "OK"
}

/// Prometheus scrape endpoint
pub async fn prometheus_metrics() -> Result<impl IntoResponse, Error> {
    let body = metrics::render().map_err(|e| Error::Internal {
        operation: format!("render metrics: {e}"),
    })?;
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
