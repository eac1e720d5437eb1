//! Chargeback-to-blacklist pipeline.
//!
//! Scans recorded chargebacks for trigger reason codes, resolves each one
//! to the bank account of the record it was originally submitted for, and
//! feeds the block-list. Best-effort batch job: one item's failure never
//! aborts the rest.

use crate::error::AppError;
use crate::models::{Chargeback, CreatedBy};
use crate::services::blacklist::{AddOutcome, BlacklistStore, NewBlacklistEntry};
use crate::services::metrics;
use crate::services::repository::BatchRepository;
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

/// The originating record a chargeback resolves to.
#[derive(Debug, Clone)]
pub struct ChargebackOrigin {
    pub bank_account_number: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
}

/// Resolves a gateway unique id to the record submitted under it.
///
/// The explicit two-step join (chargeback → originating record → account
/// identifier); `Ok(None)` is the defined unresolvable outcome.
#[async_trait]
pub trait OriginResolver: Send + Sync {
    async fn resolve_origin(
        &self,
        gateway_unique_id: &str,
    ) -> Result<Option<ChargebackOrigin>, AppError>;
}

#[async_trait]
impl OriginResolver for BatchRepository {
    async fn resolve_origin(
        &self,
        gateway_unique_id: &str,
    ) -> Result<Option<ChargebackOrigin>, AppError> {
        let found = self.find_record_by_gateway_uid(gateway_unique_id).await?;
        Ok(found.map(|(record, _)| ChargebackOrigin {
            bank_account_number: record.bank_account_number,
            customer_name: record.customer_name,
            customer_email: record.customer_email,
        }))
    }
}

/// Destination for resolved chargebacks.
#[async_trait]
pub trait BlacklistSink: Send + Sync {
    async fn add(&self, entry: NewBlacklistEntry) -> Result<AddOutcome, AppError>;
}

#[async_trait]
impl BlacklistSink for BlacklistStore {
    async fn add(&self, entry: NewBlacklistEntry) -> Result<AddOutcome, AppError> {
        BlacklistStore::add(self, entry).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Added,
    AlreadyBlacklisted,
    Unresolved,
    Error,
}

impl ItemOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::AlreadyBlacklisted => "already_blacklisted",
            Self::Unresolved => "unresolved",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineItemDetail {
    pub chargeback_id: Uuid,
    pub reason_code: String,
    pub account_identifier_masked: Option<String>,
    pub outcome: ItemOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Aggregate result of one pipeline run. Every chargeback considered is
/// accounted for in `details`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub processed: u32,
    pub added: u32,
    pub skipped: u32,
    pub errors: u32,
    pub details: Vec<PipelineItemDetail>,
}

/// Human description for a gateway chargeback reason code.
pub fn reason_description(code: &str) -> &'static str {
    match code.to_ascii_uppercase().as_str() {
        "R01" => "Insufficient Funds",
        "R02" => "Account Closed",
        "R03" => "No Account / Unable to Locate Account",
        "R04" => "Invalid Account Number",
        "R05" => "Unauthorized Debit",
        "R07" => "Authorization Revoked by Customer",
        "R08" => "Payment Stopped",
        "R10" => "Customer Advises Not Authorized",
        "R16" => "Account Frozen",
        "R20" => "Non-Transaction Account",
        "R29" => "Corporate Customer Advises Not Authorized",
        _ => "Returned by bank",
    }
}

/// Blacklist reason string recorded for an automatic entry.
pub fn blacklist_reason(code: &str) -> String {
    format!("Chargeback {}: {}", code, reason_description(code))
}

/// Run the pipeline over an already-loaded chargeback set.
///
/// The caller performs the setup step (selecting chargebacks by trigger
/// code); from here on, per-item failures are isolated into the detail
/// list and processing continues.
pub async fn run_pipeline(
    resolver: &impl OriginResolver,
    sink: &impl BlacklistSink,
    chargebacks: Vec<Chargeback>,
) -> PipelineReport {
    let mut report = PipelineReport {
        processed: chargebacks.len() as u32,
        added: 0,
        skipped: 0,
        errors: 0,
        details: Vec::with_capacity(chargebacks.len()),
    };

    for chargeback in chargebacks {
        let detail = process_one(resolver, sink, &chargeback).await;
        match detail.outcome {
            ItemOutcome::Added => report.added += 1,
            ItemOutcome::AlreadyBlacklisted | ItemOutcome::Unresolved => report.skipped += 1,
            ItemOutcome::Error => report.errors += 1,
        }
        metrics::record_chargeback_item(detail.outcome.as_str());
        report.details.push(detail);
    }

    tracing::info!(
        processed = report.processed,
        added = report.added,
        skipped = report.skipped,
        errors = report.errors,
        "Chargeback pipeline run complete"
    );

    report
}

async fn process_one(
    resolver: &impl OriginResolver,
    sink: &impl BlacklistSink,
    chargeback: &Chargeback,
) -> PipelineItemDetail {
    let mut detail = PipelineItemDetail {
        chargeback_id: chargeback.id,
        reason_code: chargeback.reason_code.clone(),
        account_identifier_masked: None,
        outcome: ItemOutcome::Error,
        message: None,
    };

    let origin = match resolver
        .resolve_origin(&chargeback.original_transaction_unique_id)
        .await
    {
        Ok(Some(origin)) => origin,
        Ok(None) => {
            detail.outcome = ItemOutcome::Unresolved;
            detail.message = Some(format!(
                "No submitted record found for gateway transaction {}",
                chargeback.original_transaction_unique_id
            ));
            return detail;
        }
        Err(e) => {
            tracing::warn!(
                chargeback_id = %chargeback.id,
                error = %e,
                "Failed to resolve chargeback origin"
            );
            detail.message = Some(e.to_string());
            return detail;
        }
    };

    let entry = NewBlacklistEntry {
        account_identifier: origin.bank_account_number,
        name: origin.customer_name,
        email: origin.customer_email,
        reason: blacklist_reason(&chargeback.reason_code),
        created_by: CreatedBy::SystemAutoBlacklist,
    };

    match sink.add(entry).await {
        Ok(outcome) => {
            detail.account_identifier_masked = Some(outcome.masked);
            detail.outcome = if outcome.added {
                ItemOutcome::Added
            } else {
                ItemOutcome::AlreadyBlacklisted
            };
        }
        Err(e) => {
            tracing::warn!(
                chargeback_id = %chargeback.id,
                error = %e,
                "Failed to add blacklist entry for chargeback"
            );
            detail.message = Some(e.to_string());
        }
    }

    detail
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{mask_identifier, normalize_identifier};
    use anyhow::anyhow;
    use mongodb::bson::DateTime;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    struct StubResolver {
        origins: HashMap<String, ChargebackOrigin>,
        failing: HashSet<String>,
    }

    #[async_trait]
    impl OriginResolver for StubResolver {
        async fn resolve_origin(
            &self,
            gateway_unique_id: &str,
        ) -> Result<Option<ChargebackOrigin>, AppError> {
            if self.failing.contains(gateway_unique_id) {
                return Err(AppError::DatabaseError(anyhow!("lookup failed")));
            }
            Ok(self.origins.get(gateway_unique_id).cloned())
        }
    }

    #[derive(Default)]
    struct StubSink {
        entries: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl BlacklistSink for StubSink {
        async fn add(&self, entry: NewBlacklistEntry) -> Result<AddOutcome, AppError> {
            let normalized = normalize_identifier(&entry.account_identifier);
            let masked = mask_identifier(&entry.account_identifier);
            let added = self.entries.lock().unwrap().insert(normalized.clone());
            Ok(AddOutcome {
                added,
                normalized,
                masked,
            })
        }
    }

    fn chargeback(uid: &str, reason_code: &str) -> Chargeback {
        Chargeback {
            id: Uuid::new_v4(),
            reason_code: reason_code.to_string(),
            original_transaction_unique_id: uid.to_string(),
            amount_minor: Some(5000),
            received_at: DateTime::now(),
        }
    }

    fn origin(account: &str) -> ChargebackOrigin {
        ChargebackOrigin {
            bank_account_number: account.to_string(),
            customer_name: Some("Jo Bloggs".to_string()),
            customer_email: Some("jo@example.com".to_string()),
        }
    }

    fn resolver_with(origins: &[(&str, &str)]) -> StubResolver {
        StubResolver {
            origins: origins
                .iter()
                .map(|(uid, account)| (uid.to_string(), origin(account)))
                .collect(),
            failing: HashSet::new(),
        }
    }

    #[tokio::test]
    async fn unresolvable_chargeback_is_skipped_not_fatal() {
        let resolver = resolver_with(&[("U1", "11112222"), ("U3", "33334444")]);
        let sink = StubSink::default();
        let chargebacks = vec![
            chargeback("U1", "R02"),
            chargeback("U2", "R02"),
            chargeback("U3", "R04"),
        ];

        let report = run_pipeline(&resolver, &sink, chargebacks).await;

        assert_eq!(report.processed, 3);
        assert_eq!(report.added, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.errors, 0);
        assert_eq!(report.details[1].outcome, ItemOutcome::Unresolved);
        assert_eq!(report.details[0].outcome, ItemOutcome::Added);
        assert_eq!(report.details[2].outcome, ItemOutcome::Added);
    }

    #[tokio::test]
    async fn duplicate_accounts_report_already_blacklisted() {
        let resolver = resolver_with(&[("U1", "11112222"), ("U2", " 1111 2222 ")]);
        let sink = StubSink::default();
        let chargebacks = vec![chargeback("U1", "R02"), chargeback("U2", "R04")];

        let report = run_pipeline(&resolver, &sink, chargebacks).await;

        assert_eq!(report.added, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.details[0].outcome, ItemOutcome::Added);
        assert_eq!(report.details[1].outcome, ItemOutcome::AlreadyBlacklisted);
        // Both details surface the masked identifier, never the raw one
        assert_eq!(
            report.details[0].account_identifier_masked.as_deref(),
            Some("1111****2222")
        );
        assert_eq!(
            report.details[1].account_identifier_masked.as_deref(),
            Some("1111****2222")
        );
    }

    #[tokio::test]
    async fn one_failing_item_does_not_abort_the_rest() {
        let mut resolver = resolver_with(&[("U1", "11112222"), ("U3", "33334444")]);
        resolver.failing.insert("U2".to_string());
        let sink = StubSink::default();
        let chargebacks = vec![
            chargeback("U1", "R02"),
            chargeback("U2", "R02"),
            chargeback("U3", "R02"),
        ];

        let report = run_pipeline(&resolver, &sink, chargebacks).await;

        assert_eq!(report.processed, 3);
        assert_eq!(report.added, 2);
        assert_eq!(report.errors, 1);
        assert_eq!(report.details[1].outcome, ItemOutcome::Error);
        assert!(report.details[1].message.is_some());
    }

    #[tokio::test]
    async fn empty_chargeback_set_yields_empty_report() {
        let resolver = resolver_with(&[]);
        let sink = StubSink::default();

        let report = run_pipeline(&resolver, &sink, vec![]).await;

        assert_eq!(report.processed, 0);
        assert_eq!(report.added, 0);
        assert!(report.details.is_empty());
    }

    #[test]
    fn blacklist_reason_includes_code_and_description() {
        assert_eq!(
            blacklist_reason("R02"),
            "Chargeback R02: Account Closed"
        );
        assert_eq!(
            blacklist_reason("R04"),
            "Chargeback R04: Invalid Account Number"
        );
        assert_eq!(
            blacklist_reason("R99"),
            "Chargeback R99: Returned by bank"
        );
    }
}
