//! EMP payment gateway client.
//!
//! Implements the three gateway operations the settlement flows consume
//! (submit, list transactions, void) plus webhook signature verification.
//! Every call is bounded by the configured request timeout.

use crate::config::EmpConfig;
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

/// EMP client for interacting with the gateway API.
#[derive(Clone)]
pub struct EmpClient {
    client: Client,
    config: EmpConfig,
}

/// Request to submit one payment instruction.
#[derive(Debug, Serialize)]
pub struct SubmitTransactionRequest {
    /// Local reference id, echoed back by the gateway.
    pub transaction_id: String,
    /// Amount in smallest currency unit.
    pub amount: i64,
    pub bank_account_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
}

/// Gateway acknowledgement of a submitted instruction.
#[derive(Debug, Deserialize)]
pub struct SubmitTransactionResponse {
    /// Gateway-assigned unique transaction id.
    pub unique_id: String,
    /// Gateway status vocabulary (e.g. approved, pending_async, declined).
    pub status: String,
    pub message: Option<String>,
}

/// A transaction as reported by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTransaction {
    pub unique_id: String,
    /// Echo of the locally supplied transaction id.
    pub reference_transaction_id: Option<String>,
    pub status: String,
    /// Present on failures and chargebacks.
    pub reason_code: Option<String>,
    pub message: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ListTransactionsResponse {
    transactions: Vec<RemoteTransaction>,
}

/// Gateway acknowledgement of a void request.
#[derive(Debug, Deserialize)]
pub struct VoidTransactionResponse {
    pub status: String,
    pub message: Option<String>,
}

/// EMP API error envelope.
#[derive(Debug, Deserialize)]
pub struct EmpError {
    pub error: EmpErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct EmpErrorDetail {
    pub code: String,
    pub message: String,
}

/// Gateway event delivered to the webhook endpoint.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub chargeback: Option<ChargebackEntity>,
}

/// Chargeback notification payload.
#[derive(Debug, Deserialize)]
pub struct ChargebackEntity {
    pub reason_code: String,
    pub original_transaction_unique_id: String,
    pub amount: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
}

impl EmpClient {
    /// Create a new EMP client.
    pub fn new(config: EmpConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    /// Check if EMP is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.merchant_id.is_empty() && !self.config.api_key.expose_secret().is_empty()
    }

    fn require_configured(&self) -> Result<()> {
        if !self.is_configured() {
            return Err(anyhow!("EMP credentials not configured"));
        }
        Ok(())
    }

    /// Submit one payment instruction to the gateway.
    pub async fn submit_transaction(
        &self,
        request: &SubmitTransactionRequest,
    ) -> Result<SubmitTransactionResponse> {
        self.require_configured()?;

        let url = format!("{}/transactions", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.config.merchant_id,
                Some(self.config.api_key.expose_secret()),
            )
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, body = %body, "EMP submit_transaction response");

        if status.is_success() {
            let submitted: SubmitTransactionResponse = serde_json::from_str(&body)?;
            tracing::info!(
                transaction_id = %request.transaction_id,
                unique_id = %submitted.unique_id,
                status = %submitted.status,
                "EMP transaction submitted"
            );
            Ok(submitted)
        } else {
            Err(self.api_error("submit_transaction", &body))
        }
    }

    /// Fetch the authoritative list of transactions.
    ///
    /// With no window the gateway returns its full available history;
    /// reconciliation relies on that to cover stragglers.
    pub async fn list_transactions(
        &self,
        window: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<RemoteTransaction>> {
        self.require_configured()?;

        let url = format!("{}/transactions", self.config.api_base_url);
        let mut request = self.client.get(&url).basic_auth(
            &self.config.merchant_id,
            Some(self.config.api_key.expose_secret()),
        );

        if let Some((start, end)) = window {
            request = request.query(&[
                ("start_date", start.to_string()),
                ("end_date", end.to_string()),
            ]);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let listed: ListTransactionsResponse = serde_json::from_str(&body)?;
            tracing::debug!(
                count = listed.transactions.len(),
                "EMP transaction list fetched"
            );
            Ok(listed.transactions)
        } else {
            Err(self.api_error("list_transactions", &body))
        }
    }

    /// Void a transaction at the gateway.
    pub async fn void_transaction(
        &self,
        unique_id: &str,
        reference_transaction_id: &str,
    ) -> Result<VoidTransactionResponse> {
        self.require_configured()?;

        let url = format!("{}/transactions/{}/void", self.config.api_base_url, unique_id);

        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.config.merchant_id,
                Some(self.config.api_key.expose_secret()),
            )
            .json(&serde_json::json!({
                "reference_transaction_id": reference_transaction_id
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let voided: VoidTransactionResponse = serde_json::from_str(&body)?;
            tracing::info!(
                unique_id = %unique_id,
                status = %voided.status,
                "EMP transaction voided"
            );
            Ok(voided)
        } else {
            Err(self.api_error("void_transaction", &body))
        }
    }

    /// Verify a webhook signature.
    ///
    /// The signature is computed as `HMAC-SHA256(request_body, webhook_secret)`.
    pub fn verify_webhook_signature(&self, body: &str, signature: &str) -> Result<bool> {
        let expected =
            compute_signature(body, self.config.webhook_secret.expose_secret())?;

        let is_valid = expected == signature;
        if !is_valid {
            tracing::warn!("EMP webhook signature verification failed");
        }
        Ok(is_valid)
    }

    /// Parse a webhook event from the raw request body.
    pub fn parse_webhook_event(&self, body: &str) -> Result<WebhookEvent> {
        let event: WebhookEvent = serde_json::from_str(body)?;
        Ok(event)
    }

    fn api_error(&self, operation: &str, body: &str) -> anyhow::Error {
        let error: EmpError = serde_json::from_str(body).unwrap_or_else(|_| EmpError {
            error: EmpErrorDetail {
                code: "UNKNOWN".to_string(),
                message: body.to_string(),
            },
        });
        tracing::error!(
            operation = %operation,
            code = %error.error.code,
            message = %error.error.message,
            "EMP request failed"
        );
        anyhow!("EMP error: {} - {}", error.error.code, error.error.message)
    }
}

/// Compute an HMAC-SHA256 signature, hex encoded.
pub fn compute_signature(payload: &str, secret: &str) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow!("Invalid key length"))?;
    mac.update(payload.as_bytes());
    let result = mac.finalize();
    Ok(hex::encode(result.into_bytes()))
}
