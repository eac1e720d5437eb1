//! Reconciliation engine.
//!
//! Correlates a locally held batch against the gateway's authoritative
//! transaction list and computes a per-row classification plus a batch
//! report. Classification is a pure function over one fetched snapshot, so
//! every row in a report is consistent with a single point-in-time gateway
//! view and a failed fetch aborts before anything is written.

use crate::error::AppError;
use crate::models::{
    Batch, ReconciliationReport, ReportDetail, RowClassification, RowState, RowStatus,
};
use crate::services::emp::{EmpClient, RemoteTransaction};
use crate::services::metrics;
use crate::services::repository::BatchRepository;
use anyhow::anyhow;
use chrono::NaiveDate;
use mongodb::bson::DateTime;
use std::collections::HashMap;
use uuid::Uuid;

pub const MISSING_IN_EMP_MESSAGE: &str = "Transaction not found in payment gateway";

/// How a raw gateway status string maps onto row classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatusKind {
    Success,
    Failure,
    InFlight,
    Unknown,
}

pub fn gateway_status_kind(status: &str) -> GatewayStatusKind {
    match status.to_ascii_lowercase().as_str() {
        "approved" => GatewayStatusKind::Success,
        "declined" | "error" | "voided" | "chargebacked" => GatewayStatusKind::Failure,
        "pending" | "pending_async" | "in_progress" => GatewayStatusKind::InFlight,
        _ => GatewayStatusKind::Unknown,
    }
}

/// Result of classifying one batch against one remote snapshot.
#[derive(Debug, Clone)]
pub struct BatchClassification {
    pub details: Vec<ReportDetail>,
    /// The full row-status list with the classification applied.
    pub updated_rows: Vec<RowStatus>,
    pub processed: u32,
    pub matched: u32,
    pub approved: u32,
    pub errors: u32,
    pub missing: u32,
}

/// Classify every row of a batch against a remote snapshot.
///
/// Precedence, first rule wins: no gateway id recorded → `not_submitted`
/// (row untouched); gateway id absent remotely → `missing_in_emp` (row
/// error); remote success → `approved`; remote failure → `error`; remote
/// in-flight → `pending` (informational, never downgrades). Duplicate
/// remote entries for one unique id resolve to the first in fetch order.
pub fn classify_batch(batch: &Batch, remote: &[RemoteTransaction]) -> BatchClassification {
    let mut by_unique_id: HashMap<&str, &RemoteTransaction> = HashMap::new();
    for tx in remote {
        by_unique_id.entry(tx.unique_id.as_str()).or_insert(tx);
    }

    let mut details = Vec::with_capacity(batch.records.len());
    let mut updated_rows = batch.rows.clone();
    let (mut matched, mut approved, mut errors, mut missing) = (0u32, 0u32, 0u32, 0u32);

    for record in &batch.records {
        let row_pos = updated_rows.iter().position(|r| r.row_id == record.row_id);
        let mut detail = ReportDetail {
            row_id: record.row_id,
            row_index: record.index,
            transaction_id: record.transaction_id.clone(),
            unique_id: None,
            status: RowClassification::NotSubmitted,
            emp_status: None,
            message: None,
        };

        let Some(row_pos) = row_pos else {
            // A record without a status entry has never been touched
            details.push(detail);
            continue;
        };
        let row = &mut updated_rows[row_pos];

        let Some(unique_id) = row.gateway_unique_id.clone() else {
            details.push(detail);
            continue;
        };
        detail.unique_id = Some(unique_id.clone());

        match by_unique_id.get(unique_id.as_str()) {
            None => {
                missing += 1;
                let message = row
                    .gateway_error
                    .clone()
                    .unwrap_or_else(|| MISSING_IN_EMP_MESSAGE.to_string());
                row.status = RowState::Error;
                row.gateway_error = Some(message.clone());
                detail.status = RowClassification::MissingInEmp;
                detail.message = Some(message);
            }
            Some(tx) => {
                matched += 1;
                detail.emp_status = Some(tx.status.clone());
                match gateway_status_kind(&tx.status) {
                    GatewayStatusKind::Success => {
                        approved += 1;
                        row.status = RowState::Approved;
                        row.gateway_status = Some(tx.status.clone());
                        row.gateway_error = tx.message.clone();
                        detail.status = RowClassification::Approved;
                        detail.message = tx.message.clone();
                    }
                    GatewayStatusKind::Failure => {
                        errors += 1;
                        let message = tx.message.clone().unwrap_or_else(|| match &tx.reason_code
                        {
                            Some(code) => format!("Transaction {} (reason {})", tx.status, code),
                            None => format!("Transaction {}", tx.status),
                        });
                        row.status = RowState::Error;
                        row.gateway_status = Some(tx.status.clone());
                        row.gateway_error = Some(message.clone());
                        detail.status = RowClassification::Error;
                        detail.message = Some(message);
                    }
                    GatewayStatusKind::InFlight => {
                        detail.status = RowClassification::Pending;
                        // Never downgrade: an approved row keeps its state
                        // and its recorded gateway status untouched
                        if row.status != RowState::Approved {
                            row.gateway_status = Some(tx.status.clone());
                        }
                    }
                    GatewayStatusKind::Unknown => {
                        errors += 1;
                        let message = format!("Unrecognized gateway status: {}", tx.status);
                        row.status = RowState::Error;
                        row.gateway_status = Some(tx.status.clone());
                        row.gateway_error = Some(message.clone());
                        detail.status = RowClassification::Error;
                        detail.message = Some(message);
                    }
                }
            }
        }

        details.push(detail);
    }

    BatchClassification {
        processed: batch.records.len() as u32,
        matched,
        approved,
        errors,
        missing,
        details,
        updated_rows,
    }
}

/// Orchestrates load → fetch → classify → version-guarded write-back.
#[derive(Clone)]
pub struct ReconciliationService {
    emp: EmpClient,
    batches: BatchRepository,
}

impl ReconciliationService {
    pub fn new(emp: EmpClient, batches: BatchRepository) -> Self {
        Self { emp, batches }
    }

    /// Reconcile a batch against the gateway. Safe to call repeatedly; each
    /// call re-derives every row's state from a fresh remote snapshot and
    /// the produced report replaces the previous one.
    pub async fn reconcile(
        &self,
        batch_id: Uuid,
        window: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<ReconciliationReport, AppError> {
        if !self.emp.is_configured() {
            return Err(AppError::ConfigError(anyhow!(
                "EMP credentials not configured"
            )));
        }

        let batch = self
            .batches
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Batch {} not found", batch_id)))?;

        // A failed or timed-out fetch aborts here, before any row is touched
        let remote = match self.emp.list_transactions(window).await {
            Ok(remote) => remote,
            Err(e) => {
                metrics::record_reconciliation_run("gateway_error");
                return Err(AppError::GatewayError(e));
            }
        };

        let classification = classify_batch(&batch, &remote);
        for detail in &classification.details {
            metrics::record_row_classified(detail.status.as_str());
        }

        let report = ReconciliationReport {
            processed: classification.processed,
            matched: classification.matched,
            approved_count: classification.approved,
            error_count: classification.errors,
            missing_count: classification.missing,
            details: classification.details,
            generated_at: DateTime::now(),
        };

        let approved_count = classification
            .updated_rows
            .iter()
            .filter(|r| r.status == RowState::Approved)
            .count() as u32;
        let error_count = classification
            .updated_rows
            .iter()
            .filter(|r| r.status == RowState::Error)
            .count() as u32;

        self.batches
            .apply_reconciliation(
                batch_id,
                batch.version,
                &classification.updated_rows,
                &report,
                approved_count,
                error_count,
            )
            .await?;

        metrics::record_reconciliation_run("completed");
        tracing::info!(
            batch_id = %batch_id,
            processed = report.processed,
            matched = report.matched,
            approved = report.approved_count,
            errors = report.error_count,
            missing = report.missing_count,
            "Batch reconciled"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BatchRecord;

    fn remote_tx(unique_id: &str, status: &str) -> RemoteTransaction {
        RemoteTransaction {
            unique_id: unique_id.to_string(),
            reference_transaction_id: None,
            status: status.to_string(),
            reason_code: None,
            message: None,
            timestamp: None,
        }
    }

    fn test_batch(rows: Vec<(Option<&str>, RowState)>) -> Batch {
        let records: Vec<BatchRecord> = rows
            .iter()
            .enumerate()
            .map(|(i, _)| BatchRecord {
                row_id: Uuid::new_v4(),
                index: i as u32,
                transaction_id: format!("tx-{i}"),
                amount_minor: 2500,
                bank_account_number: format!("1000000{i}"),
                customer_name: None,
                customer_email: None,
                source_fields: None,
            })
            .collect();

        let row_statuses: Vec<RowStatus> = records
            .iter()
            .zip(rows.iter())
            .map(|(record, (uid, state))| RowStatus {
                row_id: record.row_id,
                status: *state,
                attempts: u32::from(uid.is_some()),
                gateway_unique_id: uid.map(|u| u.to_string()),
                gateway_status: None,
                gateway_error: None,
            })
            .collect();

        let mut batch = Batch {
            id: Uuid::new_v4(),
            filename: "payments.csv".to_string(),
            version: 1,
            record_count: 0,
            approved_count: 0,
            error_count: 0,
            records,
            rows: row_statuses,
            last_reconciled_at: None,
            reconciliation_report: None,
            created_at: DateTime::now(),
            updated_at: DateTime::now(),
        };
        batch.recompute_counters();
        batch
    }

    #[test]
    fn approved_and_not_submitted_rows_classify_per_precedence() {
        let batch = test_batch(vec![
            (Some("U1"), RowState::Submitted),
            (None, RowState::Pending),
        ]);
        let remote = vec![remote_tx("U1", "approved")];

        let result = classify_batch(&batch, &remote);

        assert_eq!(result.processed, 2);
        assert_eq!(result.matched, 1);
        assert_eq!(result.approved, 1);
        assert_eq!(result.details[0].status, RowClassification::Approved);
        assert_eq!(result.details[1].status, RowClassification::NotSubmitted);
        assert_eq!(result.updated_rows[0].status, RowState::Approved);
        // Not-submitted rows are never rewritten
        assert_eq!(result.updated_rows[1].status, RowState::Pending);
        let approved_total = result
            .updated_rows
            .iter()
            .filter(|r| r.status == RowState::Approved)
            .count();
        assert_eq!(approved_total, 1);
    }

    #[test]
    fn recorded_uid_missing_remotely_is_always_an_error() {
        let batch = test_batch(vec![(Some("U9"), RowState::Submitted)]);

        let result = classify_batch(&batch, &[]);

        assert_eq!(result.missing, 1);
        assert_eq!(result.matched, 0);
        assert_eq!(result.details[0].status, RowClassification::MissingInEmp);
        assert_eq!(
            result.details[0].message.as_deref(),
            Some(MISSING_IN_EMP_MESSAGE)
        );
        assert_eq!(result.updated_rows[0].status, RowState::Error);
    }

    #[test]
    fn missing_row_keeps_gateway_supplied_message() {
        let mut batch = test_batch(vec![(Some("U9"), RowState::Submitted)]);
        batch.rows[0].gateway_error = Some("Rejected at capture".to_string());

        let result = classify_batch(&batch, &[]);

        assert_eq!(
            result.details[0].message.as_deref(),
            Some("Rejected at capture")
        );
    }

    #[test]
    fn declined_transaction_maps_to_error_with_remote_message() {
        let batch = test_batch(vec![(Some("U2"), RowState::Submitted)]);
        let mut tx = remote_tx("U2", "declined");
        tx.message = Some("Insufficient funds".to_string());
        tx.reason_code = Some("R01".to_string());

        let result = classify_batch(&batch, &[tx]);

        assert_eq!(result.errors, 1);
        assert_eq!(result.details[0].status, RowClassification::Error);
        assert_eq!(
            result.details[0].message.as_deref(),
            Some("Insufficient funds")
        );
        assert_eq!(result.updated_rows[0].status, RowState::Error);
        assert_eq!(
            result.updated_rows[0].gateway_status.as_deref(),
            Some("declined")
        );
    }

    #[test]
    fn declined_without_message_falls_back_to_reason_code() {
        let batch = test_batch(vec![(Some("U2"), RowState::Submitted)]);
        let mut tx = remote_tx("U2", "declined");
        tx.reason_code = Some("R02".to_string());

        let result = classify_batch(&batch, &[tx]);

        assert_eq!(
            result.details[0].message.as_deref(),
            Some("Transaction declined (reason R02)")
        );
    }

    #[test]
    fn pending_leaves_row_state_untouched() {
        let batch = test_batch(vec![(Some("U3"), RowState::Submitted)]);
        let remote = vec![remote_tx("U3", "pending_async")];

        let result = classify_batch(&batch, &remote);

        assert_eq!(result.details[0].status, RowClassification::Pending);
        assert_eq!(result.updated_rows[0].status, RowState::Submitted);
        assert_eq!(
            result.updated_rows[0].gateway_status.as_deref(),
            Some("pending_async")
        );
    }

    #[test]
    fn pending_never_downgrades_an_approved_row() {
        let batch = test_batch(vec![(Some("U4"), RowState::Approved)]);
        let remote = vec![remote_tx("U4", "pending")];

        let result = classify_batch(&batch, &remote);

        assert_eq!(result.details[0].status, RowClassification::Pending);
        assert_eq!(result.updated_rows[0].status, RowState::Approved);
        assert_eq!(result.updated_rows[0].gateway_status, None);
    }

    #[test]
    fn duplicate_remote_entries_resolve_to_first_in_fetch_order() {
        let batch = test_batch(vec![(Some("U5"), RowState::Submitted)]);
        let mut declined = remote_tx("U5", "declined");
        declined.message = Some("late duplicate".to_string());
        let remote = vec![remote_tx("U5", "approved"), declined];

        let result = classify_batch(&batch, &remote);

        assert_eq!(result.details[0].status, RowClassification::Approved);
        assert_eq!(result.updated_rows[0].status, RowState::Approved);
    }

    #[test]
    fn unrecognized_gateway_status_is_recorded_as_row_error() {
        let batch = test_batch(vec![(Some("U6"), RowState::Submitted)]);
        let remote = vec![remote_tx("U6", "quarantined")];

        let result = classify_batch(&batch, &remote);

        assert_eq!(result.errors, 1);
        assert_eq!(result.details[0].status, RowClassification::Error);
        assert_eq!(
            result.details[0].message.as_deref(),
            Some("Unrecognized gateway status: quarantined")
        );
    }

    #[test]
    fn classification_is_idempotent_for_an_unchanged_snapshot() {
        let batch = test_batch(vec![
            (Some("U1"), RowState::Submitted),
            (Some("U2"), RowState::Submitted),
            (None, RowState::Pending),
        ]);
        let mut declined = remote_tx("U2", "declined");
        declined.message = Some("Account closed".to_string());
        let remote = vec![remote_tx("U1", "approved"), declined];

        let first = classify_batch(&batch, &remote);

        // Re-run over the batch as it stands after the first pass
        let mut reconciled = batch.clone();
        reconciled.rows = first.updated_rows.clone();
        let second = classify_batch(&reconciled, &remote);

        let first_statuses: Vec<RowClassification> =
            first.details.iter().map(|d| d.status).collect();
        let second_statuses: Vec<RowClassification> =
            second.details.iter().map(|d| d.status).collect();
        assert_eq!(first_statuses, second_statuses);
        assert_eq!(first.approved, second.approved);
        assert_eq!(first.errors, second.errors);
        assert_eq!(first.missing, second.missing);
        for (a, b) in first.updated_rows.iter().zip(second.updated_rows.iter()) {
            assert_eq!(a.status, b.status);
            assert_eq!(a.gateway_status, b.gateway_status);
            assert_eq!(a.gateway_error, b.gateway_error);
        }
    }

    #[test]
    fn later_decline_overwrites_a_previously_approved_row() {
        let batch = test_batch(vec![(Some("U7"), RowState::Approved)]);
        let mut tx = remote_tx("U7", "declined");
        tx.message = Some("Reversed".to_string());

        let result = classify_batch(&batch, &[tx]);

        assert_eq!(result.updated_rows[0].status, RowState::Error);
        assert_eq!(result.details[0].status, RowClassification::Error);
    }

    #[test]
    fn status_kind_mapping_covers_gateway_vocabulary() {
        assert_eq!(gateway_status_kind("approved"), GatewayStatusKind::Success);
        assert_eq!(gateway_status_kind("APPROVED"), GatewayStatusKind::Success);
        assert_eq!(gateway_status_kind("declined"), GatewayStatusKind::Failure);
        assert_eq!(gateway_status_kind("voided"), GatewayStatusKind::Failure);
        assert_eq!(
            gateway_status_kind("pending_async"),
            GatewayStatusKind::InFlight
        );
        assert_eq!(gateway_status_kind("mystery"), GatewayStatusKind::Unknown);
    }
}
