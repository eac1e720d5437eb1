//! Block-list handlers: manual entry, membership check, and the
//! chargeback pipeline trigger.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;
use crate::models::CreatedBy;
use crate::services::blacklist::NewBlacklistEntry;
use crate::services::chargebacks::{blacklist_reason, run_pipeline, PipelineReport};
use crate::services::metrics;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct AddBlacklistRequest {
    #[validate(length(min = 1))]
    pub account_number: String,
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    /// Free-form reason; when absent it is derived from `chargeback_code`
    /// or falls back to a generic manual-entry label.
    pub reason: Option<String>,
    pub chargeback_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddBlacklistResponse {
    pub added: bool,
    pub account_number_masked: String,
    pub message: String,
}

/// Add one identifier to the block-list.
///
/// An identifier that is already present is not an error; the response
/// reports it as such and the existing entry is left untouched.
pub async fn add_entry(
    State(state): State<AppState>,
    Json(payload): Json<AddBlacklistRequest>,
) -> Result<(StatusCode, Json<AddBlacklistResponse>), AppError> {
    payload.validate()?;

    let reason = payload
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| match &payload.chargeback_code {
            Some(code) => blacklist_reason(code),
            None => "Manually blacklisted".to_string(),
        });

    let outcome = state
        .blacklist
        .add(NewBlacklistEntry {
            account_identifier: payload.account_number,
            name: payload.name,
            email: payload.email,
            reason,
            created_by: CreatedBy::Manual,
        })
        .await?;

    metrics::record_blacklist_addition(
        "manual",
        if outcome.added { "added" } else { "duplicate" },
    );

    let (status, message) = if outcome.added {
        (StatusCode::CREATED, "Account blacklisted".to_string())
    } else {
        (StatusCode::OK, "Account already blacklisted".to_string())
    };

    Ok((
        status,
        Json(AddBlacklistResponse {
            added: outcome.added,
            account_number_masked: outcome.masked,
            message,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CheckBlacklistRequest {
    pub identifiers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckBlacklistResponse {
    /// Normalized identifiers from the input that are blacklisted.
    pub matches: Vec<String>,
}

/// Check a list of raw identifiers against the block-list.
pub async fn check_identifiers(
    State(state): State<AppState>,
    Json(payload): Json<CheckBlacklistRequest>,
) -> Result<Json<CheckBlacklistResponse>, AppError> {
    let found = state.blacklist.find_blacklisted(&payload.identifiers).await?;

    let mut matches: Vec<String> = found.into_iter().collect();
    matches.sort();

    Ok(Json(CheckBlacklistResponse { matches }))
}

/// Run the chargeback-to-blacklist pipeline over all recorded chargebacks
/// carrying a trigger reason code.
pub async fn run_chargeback_pipeline(
    State(state): State<AppState>,
) -> Result<Json<PipelineReport>, AppError> {
    let codes = &state.config.blacklist.trigger_reason_codes;

    // Setup step; its failure fails the call. Everything after is
    // best-effort per item.
    let chargebacks = state.chargebacks.find_by_reason_codes(codes).await?;

    tracing::info!(
        trigger_codes = ?codes,
        candidates = chargebacks.len(),
        "Running chargeback-to-blacklist pipeline"
    );

    let report = run_pipeline(&state.batches, &state.blacklist, chargebacks).await;
    Ok(Json(report))
}
