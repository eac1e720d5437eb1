//! Domain models for settlement-service.
//!
//! Batches are stored as single MongoDB documents owning an ordered list of
//! records and an index-aligned list of row statuses. Records and statuses
//! are associated by a stable `row_id` assigned at batch creation, not by
//! array position, so destructive edits cannot desynchronize the two lists.

use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Batch Models
// ============================================================================

/// Lifecycle state of a single payment instruction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowState {
    Pending,
    Submitted,
    Approved,
    Error,
}

impl RowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Error => "error",
        }
    }
}

/// One uploaded payment instruction row. Immutable after creation; all
/// mutable state lives in the associated [`RowStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// Stable identity of the row within the batch.
    pub row_id: Uuid,
    /// Position in the batch, re-sequenced from 0 after destructive edits.
    pub index: u32,
    /// Local transaction reference, from the source row or synthesized as
    /// `<batch_id>-<index>`.
    pub transaction_id: String,
    /// Amount in the smallest currency unit.
    pub amount_minor: i64,
    pub bank_account_number: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    /// Free-form source fields carried through from the upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_fields: Option<serde_json::Value>,
}

/// Mutable per-row state, associated to a [`BatchRecord`] by `row_id`.
///
/// Invariant: `gateway_unique_id` is set if and only if the row has ever
/// been submitted to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowStatus {
    pub row_id: Uuid,
    pub status: RowState,
    pub attempts: u32,
    pub gateway_unique_id: Option<String>,
    /// Last raw status string reported by the gateway.
    pub gateway_status: Option<String>,
    /// Last human-readable gateway message.
    pub gateway_error: Option<String>,
}

impl RowStatus {
    pub fn new(row_id: Uuid) -> Self {
        Self {
            row_id,
            status: RowState::Pending,
            attempts: 0,
            gateway_unique_id: None,
            gateway_status: None,
            gateway_error: None,
        }
    }
}

/// One uploaded batch of payment instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub filename: String,
    /// Optimistic-concurrency token; every status-affecting write is
    /// conditional on the version it read and bumps it by one.
    pub version: i64,
    pub record_count: u32,
    pub approved_count: u32,
    pub error_count: u32,
    pub records: Vec<BatchRecord>,
    pub rows: Vec<RowStatus>,
    pub last_reconciled_at: Option<DateTime>,
    pub reconciliation_report: Option<ReconciliationReport>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Batch {
    /// Recompute the aggregate counters from the current row states.
    pub fn recompute_counters(&mut self) {
        self.approved_count = self
            .rows
            .iter()
            .filter(|r| r.status == RowState::Approved)
            .count() as u32;
        self.error_count = self
            .rows
            .iter()
            .filter(|r| r.status == RowState::Error)
            .count() as u32;
        self.record_count = self.records.len() as u32;
    }

    /// Row status for a given `row_id`, if present.
    pub fn row_status(&self, row_id: Uuid) -> Option<&RowStatus> {
        self.rows.iter().find(|r| r.row_id == row_id)
    }
}

// ============================================================================
// Reconciliation Models
// ============================================================================

/// Per-row outcome of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowClassification {
    /// Row was never submitted; not yet eligible for gateway-side truth.
    NotSubmitted,
    Approved,
    Error,
    /// A gateway id is recorded locally but the gateway has no such
    /// transaction.
    MissingInEmp,
    /// Gateway reports an in-flight state; informational only.
    Pending,
}

impl RowClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSubmitted => "not_submitted",
            Self::Approved => "approved",
            Self::Error => "error",
            Self::MissingInEmp => "missing_in_emp",
            Self::Pending => "pending",
        }
    }
}

/// One row's entry in a reconciliation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDetail {
    pub row_id: Uuid,
    pub row_index: u32,
    pub transaction_id: String,
    pub unique_id: Option<String>,
    pub status: RowClassification,
    pub emp_status: Option<String>,
    pub message: Option<String>,
}

/// Aggregate result of one reconciliation pass. Only the latest report is
/// retained on the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub processed: u32,
    /// Rows whose gateway id was found in the remote snapshot.
    pub matched: u32,
    pub approved_count: u32,
    pub error_count: u32,
    pub missing_count: u32,
    pub details: Vec<ReportDetail>,
    pub generated_at: DateTime,
}

// ============================================================================
// Chargeback Models
// ============================================================================

/// An adverse outcome reported by the gateway after initial processing.
///
/// Carries only the reason code and the foreign reference into the batch's
/// submitted rows; account and customer data are resolved by following the
/// reference, never stored redundantly here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chargeback {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub reason_code: String,
    /// Gateway unique id of the transaction being charged back.
    pub original_transaction_unique_id: String,
    pub amount_minor: Option<i64>,
    pub received_at: DateTime,
}

// ============================================================================
// Blacklist Models
// ============================================================================

/// Origin of a blacklist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatedBy {
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "system-auto-blacklist")]
    SystemAutoBlacklist,
}

impl CreatedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::SystemAutoBlacklist => "system-auto-blacklist",
        }
    }
}

/// A blocked bank account identifier.
///
/// At most one entry exists per normalized identifier (unique index);
/// insertion is a conditional create and never overwrites an existing
/// entry's reason or metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    #[serde(rename = "_id")]
    pub id: Uuid,
    /// Canonical dedupe key: whitespace stripped, uppercased.
    pub account_identifier_normalized: String,
    /// Display form: first 4 + `****` + last 4 of the normalized value.
    pub account_identifier_masked: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub reason: String,
    pub created_by: CreatedBy,
    pub created_at: DateTime,
}
