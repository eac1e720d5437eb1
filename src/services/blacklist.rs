//! Block-list store for bank account identifiers.
//!
//! Deduplication is enforced by a unique index on the normalized
//! identifier, so concurrent adds of the same identifier race at the store
//! rather than at the application layer: the first insert wins and every
//! later attempt reports `added = false`.

use crate::error::AppError;
use crate::models::{BlacklistEntry, CreatedBy};
use crate::utils::{mask_identifier, normalize_identifier};
use mongodb::bson::{doc, DateTime};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};
use std::collections::HashSet;
use uuid::Uuid;

const DUPLICATE_KEY_CODE: i32 = 11000;

/// Input for a conditional blacklist insert.
#[derive(Debug, Clone)]
pub struct NewBlacklistEntry {
    pub account_identifier: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub reason: String,
    pub created_by: CreatedBy,
}

/// Outcome of a conditional insert. `added = false` means the identifier
/// was already present; the existing entry is never touched.
#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub added: bool,
    pub normalized: String,
    pub masked: String,
}

#[derive(Clone)]
pub struct BlacklistStore {
    collection: Collection<BlacklistEntry>,
}

impl BlacklistStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("blacklist"),
        }
    }

    /// Initialize the unique index backing the dedupe contract.
    pub async fn init_indexes(&self) -> Result<(), AppError> {
        let unique_normalized = IndexModel::builder()
            .keys(doc! { "account_identifier_normalized": 1 })
            .options(
                IndexOptions::builder()
                    .name("blacklist_normalized_unique_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.collection
            .create_indexes([unique_normalized], None)
            .await?;

        tracing::info!("Blacklist indexes initialized");
        Ok(())
    }

    /// Conditionally insert an identifier. First writer wins; a duplicate
    /// insert is a no-op reported as already present, never an error.
    pub async fn add(&self, new_entry: NewBlacklistEntry) -> Result<AddOutcome, AppError> {
        let normalized = normalize_identifier(&new_entry.account_identifier);
        let masked = mask_identifier(&new_entry.account_identifier);

        let entry = BlacklistEntry {
            id: Uuid::new_v4(),
            account_identifier_normalized: normalized.clone(),
            account_identifier_masked: masked.clone(),
            name: new_entry.name,
            email: new_entry.email,
            reason: new_entry.reason,
            created_by: new_entry.created_by,
            created_at: DateTime::now(),
        };

        match self.collection.insert_one(entry, None).await {
            Ok(_) => {
                tracing::info!(
                    account = %masked,
                    created_by = %new_entry.created_by.as_str(),
                    "Blacklist entry added"
                );
                Ok(AddOutcome {
                    added: true,
                    normalized,
                    masked,
                })
            }
            Err(e) if is_duplicate_key_error(&e) => {
                tracing::debug!(account = %masked, "Blacklist entry already present");
                Ok(AddOutcome {
                    added: false,
                    normalized,
                    masked,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Which of the given identifiers are blacklisted, as a set of
    /// normalized values. Normalization is applied to the query side here
    /// and to the stored side at insert time, so mixed-format inputs match.
    pub async fn find_blacklisted(
        &self,
        identifiers: &[String],
    ) -> Result<HashSet<String>, AppError> {
        let normalized: Vec<String> = identifiers
            .iter()
            .map(|i| normalize_identifier(i))
            .filter(|i| !i.is_empty())
            .collect();

        if normalized.is_empty() {
            return Ok(HashSet::new());
        }

        let filter = doc! { "account_identifier_normalized": { "$in": &normalized[..] } };
        let mut cursor = self.collection.find(filter, None).await?;

        let mut found = HashSet::new();
        use futures::TryStreamExt;
        while let Some(entry) = cursor.try_next().await? {
            found.insert(entry.account_identifier_normalized);
        }
        Ok(found)
    }
}

fn is_duplicate_key_error(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref we)) if we.code == DUPLICATE_KEY_CODE
    )
}

// ============================================================================
// Batch filtering
// ============================================================================

/// Outcome of filtering a batch against the block-list.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    /// Original indices of the removed rows.
    pub removed: Vec<u32>,
    /// Remaining records and row statuses, re-indexed from 0 with no gaps
    /// and relative order preserved.
    pub records: Vec<crate::models::BatchRecord>,
    pub rows: Vec<crate::models::RowStatus>,
}

/// Remove every record whose bank account identifier is in the blacklisted
/// set (normalized), keeping the record/status association by `row_id`.
/// Pure; the destructive write-back is the caller's responsibility.
pub fn filter_batch_rows(
    records: &[crate::models::BatchRecord],
    rows: &[crate::models::RowStatus],
    blacklisted: &HashSet<String>,
) -> FilterOutcome {
    let mut removed = Vec::new();
    let mut kept_records = Vec::new();
    let mut kept_rows = Vec::new();

    for record in records {
        if blacklisted.contains(&normalize_identifier(&record.bank_account_number)) {
            removed.push(record.index);
            continue;
        }

        let mut record = record.clone();
        let status = rows
            .iter()
            .find(|r| r.row_id == record.row_id)
            .cloned()
            .unwrap_or_else(|| crate::models::RowStatus::new(record.row_id));

        record.index = kept_records.len() as u32;
        kept_records.push(record);
        kept_rows.push(status);
    }

    FilterOutcome {
        removed,
        records: kept_records,
        rows: kept_rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BatchRecord, RowStatus};

    fn record(index: u32, account: &str) -> BatchRecord {
        BatchRecord {
            row_id: Uuid::new_v4(),
            index,
            transaction_id: format!("tx-{index}"),
            amount_minor: 1000,
            bank_account_number: account.to_string(),
            customer_name: None,
            customer_email: None,
            source_fields: None,
        }
    }

    fn batch_of(accounts: &[&str]) -> (Vec<BatchRecord>, Vec<RowStatus>) {
        let records: Vec<BatchRecord> = accounts
            .iter()
            .enumerate()
            .map(|(i, a)| record(i as u32, a))
            .collect();
        let rows = records.iter().map(|r| RowStatus::new(r.row_id)).collect();
        (records, rows)
    }

    #[test]
    fn removes_blacklisted_rows_and_reindexes() {
        let (records, rows) = batch_of(&["11112222", "33334444", "55556666"]);
        let blacklisted: HashSet<String> = ["11112222".to_string()].into_iter().collect();

        let outcome = filter_batch_rows(&records, &rows, &blacklisted);

        assert_eq!(outcome.removed, vec![0]);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.rows.len(), 2);
        let indices: Vec<u32> = outcome.records.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(outcome.records[0].bank_account_number, "33334444");
        assert_eq!(outcome.records[1].bank_account_number, "55556666");
    }

    #[test]
    fn matches_identifiers_regardless_of_format() {
        let (records, rows) = batch_of(&[" 1111 2222 ", "33334444"]);
        let blacklisted: HashSet<String> = ["11112222".to_string()].into_iter().collect();

        let outcome = filter_batch_rows(&records, &rows, &blacklisted);

        assert_eq!(outcome.removed, vec![0]);
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn keeps_record_status_association_by_row_id() {
        let (records, mut rows) = batch_of(&["11112222", "33334444", "55556666"]);
        // Mark the last row approved so we can watch it travel with its record
        rows[2].status = crate::models::RowState::Approved;
        let blacklisted: HashSet<String> = ["33334444".to_string()].into_iter().collect();

        let outcome = filter_batch_rows(&records, &rows, &blacklisted);

        assert_eq!(outcome.removed, vec![1]);
        assert_eq!(outcome.records[1].bank_account_number, "55556666");
        assert_eq!(outcome.rows[1].row_id, outcome.records[1].row_id);
        assert_eq!(outcome.rows[1].status, crate::models::RowState::Approved);
    }

    #[test]
    fn no_blacklisted_rows_is_a_noop() {
        let (records, rows) = batch_of(&["11112222", "33334444"]);
        let outcome = filter_batch_rows(&records, &rows, &HashSet::new());

        assert!(outcome.removed.is_empty());
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].index, 0);
        assert_eq!(outcome.records[1].index, 1);
    }

    #[test]
    fn removing_k_of_m_leaves_m_minus_k_with_no_gaps() {
        let (records, rows) = batch_of(&["a1111111", "b2222222", "c3333333", "d4444444"]);
        let blacklisted: HashSet<String> = ["A1111111".to_string(), "C3333333".to_string()]
            .into_iter()
            .collect();

        let outcome = filter_batch_rows(&records, &rows, &blacklisted);

        assert_eq!(outcome.removed, vec![0, 2]);
        assert_eq!(outcome.records.len(), 2);
        let indices: Vec<u32> = outcome.records.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }
}
