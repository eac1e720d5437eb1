//! MongoDB repositories for batches and chargebacks.
//!
//! Every status-affecting batch write is conditional on the version the
//! caller read and bumps it by one; a write that matches no document is
//! reported as a version conflict (or not-found) instead of silently
//! falling back to last-write-wins.

use crate::error::AppError;
use crate::models::{Batch, BatchRecord, Chargeback, ReconciliationReport, RowStatus};
use anyhow::anyhow;
use futures::TryStreamExt;
use mongodb::bson::{doc, DateTime};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Collection, Database, IndexModel};
use uuid::Uuid;

#[derive(Clone)]
pub struct BatchRepository {
    collection: Collection<Batch>,
}

impl BatchRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("batches"),
        }
    }

    /// Initialize batch collection indexes.
    pub async fn init_indexes(&self) -> Result<(), AppError> {
        // Chargeback resolution looks up batches by a row's gateway id
        let gateway_uid_index = IndexModel::builder()
            .keys(doc! { "rows.gateway_unique_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("row_gateway_unique_id_idx".to_string())
                    .build(),
            )
            .build();

        let created_at_index = IndexModel::builder()
            .keys(doc! { "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("batch_created_at_idx".to_string())
                    .build(),
            )
            .build();

        self.collection
            .create_indexes([gateway_uid_index, created_at_index], None)
            .await?;

        tracing::info!("Batch indexes initialized");
        Ok(())
    }

    pub async fn create_batch(&self, batch: Batch) -> Result<(), AppError> {
        self.collection.insert_one(batch, None).await?;
        Ok(())
    }

    pub async fn get_batch(&self, id: Uuid) -> Result<Option<Batch>, AppError> {
        let filter = doc! { "_id": id.to_string() };
        let batch = self.collection.find_one(filter, None).await?;
        Ok(batch)
    }

    /// List batches, newest first.
    pub async fn list_batches(&self, limit: i64) -> Result<Vec<Batch>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .limit(limit)
            .build();
        let cursor = self.collection.find(doc! {}, Some(options)).await?;
        let batches: Vec<Batch> = cursor.try_collect().await?;
        Ok(batches)
    }

    /// Write back row statuses and counters after submission.
    pub async fn apply_submission(
        &self,
        id: Uuid,
        expected_version: i64,
        rows: &[RowStatus],
        approved_count: u32,
        error_count: u32,
    ) -> Result<(), AppError> {
        let update = doc! {
            "$set": {
                "rows": mongodb::bson::to_bson(rows)
                    .map_err(|e| AppError::InternalError(e.into()))?,
                "approved_count": approved_count,
                "error_count": error_count,
                "updated_at": DateTime::now(),
            },
            "$inc": { "version": 1i64 },
        };
        self.versioned_update(id, expected_version, update).await
    }

    /// Write back the outcome of a reconciliation pass: mutated row
    /// statuses, recomputed counters, and the report replacing any
    /// previous one.
    pub async fn apply_reconciliation(
        &self,
        id: Uuid,
        expected_version: i64,
        rows: &[RowStatus],
        report: &ReconciliationReport,
        approved_count: u32,
        error_count: u32,
    ) -> Result<(), AppError> {
        let update = doc! {
            "$set": {
                "rows": mongodb::bson::to_bson(rows)
                    .map_err(|e| AppError::InternalError(e.into()))?,
                "reconciliation_report": mongodb::bson::to_bson(report)
                    .map_err(|e| AppError::InternalError(e.into()))?,
                "approved_count": approved_count,
                "error_count": error_count,
                "last_reconciled_at": report.generated_at,
                "updated_at": DateTime::now(),
            },
            "$inc": { "version": 1i64 },
        };
        self.versioned_update(id, expected_version, update).await
    }

    /// Replace the record and row lists after a destructive blacklist
    /// filter, with counters recomputed by the caller.
    pub async fn replace_rows(
        &self,
        id: Uuid,
        expected_version: i64,
        records: &[BatchRecord],
        rows: &[RowStatus],
        approved_count: u32,
        error_count: u32,
    ) -> Result<(), AppError> {
        let update = doc! {
            "$set": {
                "records": mongodb::bson::to_bson(records)
                    .map_err(|e| AppError::InternalError(e.into()))?,
                "rows": mongodb::bson::to_bson(rows)
                    .map_err(|e| AppError::InternalError(e.into()))?,
                "record_count": records.len() as u32,
                "approved_count": approved_count,
                "error_count": error_count,
                "updated_at": DateTime::now(),
            },
            "$inc": { "version": 1i64 },
        };
        self.versioned_update(id, expected_version, update).await
    }

    /// Find the batch record that was submitted under a given gateway
    /// unique id, together with its row status.
    pub async fn find_record_by_gateway_uid(
        &self,
        unique_id: &str,
    ) -> Result<Option<(BatchRecord, RowStatus)>, AppError> {
        let filter = doc! { "rows.gateway_unique_id": unique_id };
        let Some(batch) = self.collection.find_one(filter, None).await? else {
            return Ok(None);
        };

        let Some(row) = batch
            .rows
            .iter()
            .find(|r| r.gateway_unique_id.as_deref() == Some(unique_id))
        else {
            return Ok(None);
        };
        let Some(record) = batch.records.iter().find(|r| r.row_id == row.row_id) else {
            return Ok(None);
        };

        Ok(Some((record.clone(), row.clone())))
    }

    async fn versioned_update(
        &self,
        id: Uuid,
        expected_version: i64,
        update: mongodb::bson::Document,
    ) -> Result<(), AppError> {
        let filter = doc! { "_id": id.to_string(), "version": expected_version };
        let result = self.collection.update_one(filter, update, None).await?;

        if result.matched_count == 0 {
            // Distinguish a stale version from a missing batch
            return if self.get_batch(id).await?.is_some() {
                Err(AppError::VersionConflict(anyhow!(
                    "Batch {} was modified concurrently",
                    id
                )))
            } else {
                Err(AppError::NotFound(anyhow!("Batch {} not found", id)))
            };
        }

        Ok(())
    }
}

#[derive(Clone)]
pub struct ChargebackRepository {
    collection: Collection<Chargeback>,
}

impl ChargebackRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("chargebacks"),
        }
    }

    pub async fn init_indexes(&self) -> Result<(), AppError> {
        let reason_code_index = IndexModel::builder()
            .keys(doc! { "reason_code": 1 })
            .options(
                IndexOptions::builder()
                    .name("chargeback_reason_code_idx".to_string())
                    .build(),
            )
            .build();

        self.collection
            .create_indexes([reason_code_index], None)
            .await?;

        tracing::info!("Chargeback indexes initialized");
        Ok(())
    }

    pub async fn insert(&self, chargeback: Chargeback) -> Result<(), AppError> {
        self.collection.insert_one(chargeback, None).await?;
        Ok(())
    }

    /// All recorded chargebacks whose reason code is in the trigger set.
    pub async fn find_by_reason_codes(
        &self,
        reason_codes: &[String],
    ) -> Result<Vec<Chargeback>, AppError> {
        let filter = doc! { "reason_code": { "$in": reason_codes } };
        let cursor = self.collection.find(filter, None).await?;
        let chargebacks: Vec<Chargeback> = cursor.try_collect().await?;
        Ok(chargebacks)
    }
}
