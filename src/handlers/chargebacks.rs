//! EMP webhook intake.
//!
//! Chargeback notifications arrive here, authenticated by an HMAC-SHA256
//! signature over the raw body, and are persisted for the pipeline to pick
//! up on its next run.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use mongodb::bson::DateTime;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Chargeback;
use crate::AppState;

pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-emp-signature";

pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing EMP webhook signature header");
            AppError::Unauthorized(anyhow::anyhow!("Missing webhook signature"))
        })?;

    let is_valid = state
        .emp
        .verify_webhook_signature(&body, signature)
        .map_err(|e| {
            tracing::error!(error = %e, "Webhook signature verification error");
            AppError::InternalError(anyhow::anyhow!("Webhook verification failed"))
        })?;

    if !is_valid {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    let event = state.emp.parse_webhook_event(&body).map_err(|e| {
        tracing::error!(error = %e, "Failed to parse webhook event");
        AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload"))
    })?;

    tracing::info!(event_type = %event.event, "Processing EMP webhook");

    match event.event.as_str() {
        "chargeback.created" => {
            if let Some(cb) = event.payload.chargeback {
                let chargeback = Chargeback {
                    id: Uuid::new_v4(),
                    reason_code: cb.reason_code.to_uppercase(),
                    original_transaction_unique_id: cb.original_transaction_unique_id,
                    amount_minor: cb.amount,
                    received_at: cb
                        .created_at
                        .map(DateTime::from_chrono)
                        .unwrap_or_else(DateTime::now),
                };

                tracing::info!(
                    chargeback_id = %chargeback.id,
                    reason_code = %chargeback.reason_code,
                    original_unique_id = %chargeback.original_transaction_unique_id,
                    "Chargeback recorded"
                );

                state.chargebacks.insert(chargeback).await?;
            } else {
                tracing::warn!("chargeback.created event without chargeback payload");
            }
        }
        _ => {
            tracing::debug!(event_type = %event.event, "Unhandled webhook event type");
        }
    }

    // Always acknowledge once authenticated and parsed
    Ok(StatusCode::OK)
}
