//! Operator authorization for routes that reach the gateway or mutate
//! money-moving state (submit, reconcile, void, chargeback pipeline).
//!
//! Session and two-factor authentication are handled upstream; this layer
//! only enforces the elevated-privilege boundary with a static key.

use crate::error::AppError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;

pub const OPERATOR_KEY_HEADER: &str = "x-operator-key";

pub async fn operator_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = state.config.operator.api_key.expose_secret();
    if expected.is_empty() {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "Operator API key not configured"
        )));
    }

    let presented = req
        .headers()
        .get(OPERATOR_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if presented != expected {
        tracing::warn!(path = %req.uri().path(), "Operator authorization failed");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Operator authorization required"
        )));
    }

    Ok(next.run(req).await)
}
