//! Batch lifecycle handlers: intake, submission, reconciliation, and
//! blacklist filtering.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::models::{
    Batch, BatchRecord, ReconciliationReport, ReportDetail, RowState, RowStatus,
};
use crate::services::blacklist::filter_batch_rows;
use crate::services::emp::SubmitTransactionRequest;
use crate::services::metrics;
use crate::services::reconciliation::{gateway_status_kind, GatewayStatusKind};
use crate::utils::normalize_identifier;
use crate::AppState;

// ============================================================================
// Request / Response DTOs
// ============================================================================

/// One already-parsed instruction row from an uploaded file.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateBatchRecord {
    /// Local reference; synthesized as `<batch_id>-<index>` when absent.
    pub transaction_id: Option<String>,
    /// Amount in smallest currency unit.
    pub amount_minor: i64,
    pub bank_account_number: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub source_fields: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBatchRequest {
    #[validate(length(min = 1))]
    pub filename: String,
    #[validate(length(min = 1))]
    pub records: Vec<CreateBatchRecord>,
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub id: Uuid,
    pub filename: String,
    pub record_count: u32,
    pub approved_count: u32,
    pub error_count: u32,
    pub created_at: String,
    pub updated_at: String,
    pub last_reconciled_at: Option<String>,
}

impl From<&Batch> for BatchSummary {
    fn from(b: &Batch) -> Self {
        Self {
            id: b.id,
            filename: b.filename.clone(),
            record_count: b.record_count,
            approved_count: b.approved_count,
            error_count: b.error_count,
            created_at: b.created_at.to_string(),
            updated_at: b.updated_at.to_string(),
            last_reconciled_at: b.last_reconciled_at.map(|d| d.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReconciliationReportResponse {
    pub processed: u32,
    pub matched: u32,
    pub approved_count: u32,
    pub error_count: u32,
    pub missing_count: u32,
    pub generated_at: String,
    pub details: Vec<ReportDetail>,
}

impl From<ReconciliationReport> for ReconciliationReportResponse {
    fn from(r: ReconciliationReport) -> Self {
        Self {
            processed: r.processed,
            matched: r.matched,
            approved_count: r.approved_count,
            error_count: r.error_count,
            missing_count: r.missing_count,
            generated_at: r.generated_at.to_string(),
            details: r.details,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub id: Uuid,
    pub filename: String,
    pub version: i64,
    pub record_count: u32,
    pub approved_count: u32,
    pub error_count: u32,
    pub records: Vec<BatchRecord>,
    pub rows: Vec<RowStatus>,
    pub created_at: String,
    pub updated_at: String,
    pub last_reconciled_at: Option<String>,
    pub reconciliation_report: Option<ReconciliationReportResponse>,
}

impl From<Batch> for BatchResponse {
    fn from(b: Batch) -> Self {
        Self {
            id: b.id,
            filename: b.filename,
            version: b.version,
            record_count: b.record_count,
            approved_count: b.approved_count,
            error_count: b.error_count,
            records: b.records,
            rows: b.rows,
            created_at: b.created_at.to_string(),
            updated_at: b.updated_at.to_string(),
            last_reconciled_at: b.last_reconciled_at.map(|d| d.to_string()),
            reconciliation_report: b.reconciliation_report.map(Into::into),
        }
    }
}

/// Optional explicit reconciliation window; without one the engine asks
/// the gateway for its full available history.
#[derive(Debug, Default, Deserialize)]
pub struct ReconcileRequest {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct SubmitBatchResponse {
    pub processed: u32,
    pub submitted: u32,
    pub approved: u32,
    pub errors: u32,
    pub skipped_blacklisted: u32,
}

#[derive(Debug, Serialize)]
pub struct FilterBatchResponse {
    /// Original indices of the removed rows.
    pub removed: Vec<u32>,
    pub remaining: u32,
}

#[derive(Debug, Serialize)]
pub struct VoidRowResponse {
    pub row_id: Uuid,
    pub gateway_status: String,
    pub message: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a batch from already-parsed instruction rows.
pub async fn create_batch(
    State(state): State<AppState>,
    Json(payload): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<BatchResponse>), AppError> {
    payload.validate()?;

    let batch_id = Uuid::new_v4();
    let mut records = Vec::with_capacity(payload.records.len());
    let mut rows = Vec::with_capacity(payload.records.len());

    for (index, record) in payload.records.into_iter().enumerate() {
        if record.amount_minor <= 0 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Record {} has a non-positive amount",
                index
            )));
        }
        if record.bank_account_number.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Record {} is missing a bank account number",
                index
            )));
        }

        let row_id = Uuid::new_v4();
        records.push(BatchRecord {
            row_id,
            index: index as u32,
            transaction_id: record
                .transaction_id
                .unwrap_or_else(|| format!("{batch_id}-{index}")),
            amount_minor: record.amount_minor,
            bank_account_number: record.bank_account_number,
            customer_name: record.customer_name,
            customer_email: record.customer_email,
            source_fields: record.source_fields,
        });
        rows.push(RowStatus::new(row_id));
    }

    let now = DateTime::now();
    let mut batch = Batch {
        id: batch_id,
        filename: payload.filename,
        version: 1,
        record_count: 0,
        approved_count: 0,
        error_count: 0,
        records,
        rows,
        last_reconciled_at: None,
        reconciliation_report: None,
        created_at: now,
        updated_at: now,
    };
    batch.recompute_counters();

    tracing::info!(
        batch_id = %batch.id,
        filename = %batch.filename,
        record_count = batch.record_count,
        "Creating batch"
    );

    state.batches.create_batch(batch.clone()).await?;

    Ok((StatusCode::CREATED, Json(BatchResponse::from(batch))))
}

pub async fn list_batches(
    State(state): State<AppState>,
) -> Result<Json<Vec<BatchSummary>>, AppError> {
    let batches = state.batches.list_batches(100).await?;
    Ok(Json(batches.iter().map(BatchSummary::from).collect()))
}

pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchResponse>, AppError> {
    let batch = state
        .batches
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Batch not found")))?;
    Ok(Json(BatchResponse::from(batch)))
}

/// Submit every eligible row to the gateway.
///
/// Blacklisted accounts are refused locally before any gateway call. Rows
/// already carrying a gateway id are never re-submitted; reconciliation is
/// the way to learn their fate.
pub async fn submit_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<SubmitBatchResponse>, AppError> {
    if !state.emp.is_configured() {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "EMP credentials not configured"
        )));
    }

    let batch = state
        .batches
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Batch not found")))?;

    let mut rows = batch.rows.clone();
    let eligible: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            matches!(r.status, RowState::Pending | RowState::Error)
                && r.gateway_unique_id.is_none()
        })
        .map(|(i, _)| i)
        .collect();

    let accounts: Vec<String> = eligible
        .iter()
        .filter_map(|&i| {
            batch
                .records
                .iter()
                .find(|rec| rec.row_id == rows[i].row_id)
                .map(|rec| rec.bank_account_number.clone())
        })
        .collect();
    let blacklisted = state.blacklist.find_blacklisted(&accounts).await?;

    let mut response = SubmitBatchResponse {
        processed: eligible.len() as u32,
        submitted: 0,
        approved: 0,
        errors: 0,
        skipped_blacklisted: 0,
    };

    for i in eligible {
        let Some(record) = batch
            .records
            .iter()
            .find(|rec| rec.row_id == rows[i].row_id)
        else {
            continue;
        };
        let row = &mut rows[i];

        if blacklisted.contains(&normalize_identifier(&record.bank_account_number)) {
            row.status = RowState::Error;
            row.gateway_error = Some("Bank account is blacklisted".to_string());
            response.skipped_blacklisted += 1;
            continue;
        }

        row.attempts += 1;
        let request = SubmitTransactionRequest {
            transaction_id: record.transaction_id.clone(),
            amount: record.amount_minor,
            bank_account_number: record.bank_account_number.clone(),
            customer_name: record.customer_name.clone(),
            customer_email: record.customer_email.clone(),
        };

        match state.emp.submit_transaction(&request).await {
            Ok(submitted) => {
                row.gateway_unique_id = Some(submitted.unique_id);
                row.gateway_status = Some(submitted.status.clone());
                row.gateway_error = submitted.message;
                match gateway_status_kind(&submitted.status) {
                    GatewayStatusKind::Success => {
                        row.status = RowState::Approved;
                        response.approved += 1;
                    }
                    GatewayStatusKind::Failure => {
                        row.status = RowState::Error;
                        response.errors += 1;
                    }
                    _ => {
                        row.status = RowState::Submitted;
                        response.submitted += 1;
                    }
                }
                metrics::record_gateway_request("submit", "ok");
            }
            Err(e) => {
                tracing::warn!(
                    batch_id = %batch_id,
                    transaction_id = %record.transaction_id,
                    error = %e,
                    "Row submission failed"
                );
                row.status = RowState::Error;
                row.gateway_error = Some(e.to_string());
                response.errors += 1;
                metrics::record_gateway_request("submit", "error");
            }
        }
    }

    let approved_count = rows.iter().filter(|r| r.status == RowState::Approved).count() as u32;
    let error_count = rows.iter().filter(|r| r.status == RowState::Error).count() as u32;
    state
        .batches
        .apply_submission(batch_id, batch.version, &rows, approved_count, error_count)
        .await?;

    tracing::info!(
        batch_id = %batch_id,
        processed = response.processed,
        submitted = response.submitted,
        approved = response.approved,
        errors = response.errors,
        skipped_blacklisted = response.skipped_blacklisted,
        "Batch submitted"
    );

    Ok(Json(response))
}

/// Reconcile a batch against the gateway's authoritative transaction list.
pub async fn reconcile_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    payload: Option<Json<ReconcileRequest>>,
) -> Result<Json<ReconciliationReportResponse>, AppError> {
    let request = payload.map(|Json(p)| p).unwrap_or_default();
    let window = match (request.start_date, request.end_date) {
        (Some(start), Some(end)) => {
            if end < start {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "end_date precedes start_date"
                )));
            }
            Some((start, end))
        }
        (None, None) => None,
        _ => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "start_date and end_date must be supplied together"
            )))
        }
    };

    tracing::info!(batch_id = %batch_id, window = ?window, "Reconciling batch");

    let report = state.reconciliation.reconcile(batch_id, window).await?;
    Ok(Json(report.into()))
}

/// Destructively remove every blacklisted row from a batch.
///
/// One-way: removed rows are gone from the document; the uploaded source
/// file is the only recovery path.
pub async fn filter_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<FilterBatchResponse>, AppError> {
    let batch = state
        .batches
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Batch not found")))?;

    let accounts: Vec<String> = batch
        .records
        .iter()
        .map(|r| r.bank_account_number.clone())
        .collect();
    let blacklisted = state.blacklist.find_blacklisted(&accounts).await?;

    let outcome = filter_batch_rows(&batch.records, &batch.rows, &blacklisted);
    let remaining = outcome.records.len() as u32;

    if !outcome.removed.is_empty() {
        let approved_count = outcome
            .rows
            .iter()
            .filter(|r| r.status == RowState::Approved)
            .count() as u32;
        let error_count = outcome
            .rows
            .iter()
            .filter(|r| r.status == RowState::Error)
            .count() as u32;
        state
            .batches
            .replace_rows(
                batch_id,
                batch.version,
                &outcome.records,
                &outcome.rows,
                approved_count,
                error_count,
            )
            .await?;

        tracing::info!(
            batch_id = %batch_id,
            removed = outcome.removed.len(),
            remaining = remaining,
            "Blacklisted rows removed from batch"
        );
    }

    Ok(Json(FilterBatchResponse {
        removed: outcome.removed,
        remaining,
    }))
}

/// Void a submitted row at the gateway.
pub async fn void_row(
    State(state): State<AppState>,
    Path((batch_id, row_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<VoidRowResponse>, AppError> {
    if !state.emp.is_configured() {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "EMP credentials not configured"
        )));
    }

    let batch = state
        .batches
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Batch not found")))?;

    let row = batch
        .row_status(row_id)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Row not found")))?;
    let unique_id = row.gateway_unique_id.clone().ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Row has not been submitted to the gateway"))
    })?;
    let record = batch
        .records
        .iter()
        .find(|r| r.row_id == row_id)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Row not found")))?;

    let voided = state
        .emp
        .void_transaction(&unique_id, &record.transaction_id)
        .await
        .map_err(AppError::GatewayError)?;
    metrics::record_gateway_request("void", "ok");

    let mut rows = batch.rows.clone();
    if let Some(row) = rows.iter_mut().find(|r| r.row_id == row_id) {
        row.status = RowState::Error;
        row.gateway_status = Some(voided.status.clone());
        row.gateway_error = Some(
            voided
                .message
                .clone()
                .unwrap_or_else(|| "Transaction voided".to_string()),
        );
    }
    let approved_count = rows.iter().filter(|r| r.status == RowState::Approved).count() as u32;
    let error_count = rows.iter().filter(|r| r.status == RowState::Error).count() as u32;
    state
        .batches
        .apply_submission(batch_id, batch.version, &rows, approved_count, error_count)
        .await?;

    tracing::info!(batch_id = %batch_id, row_id = %row_id, "Row voided");

    Ok(Json(VoidRowResponse {
        row_id,
        gateway_status: voided.status,
        message: voided.message,
    }))
}
