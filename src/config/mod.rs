use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub emp: EmpConfig,
    pub operator: OperatorConfig,
    pub blacklist: BlacklistConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

/// EMP payment gateway credentials and endpoints.
#[derive(Deserialize, Clone, Debug)]
pub struct EmpConfig {
    pub api_base_url: String,
    pub merchant_id: String,
    pub api_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    /// Upper bound on any single gateway call; a timed-out reconcile fetch
    /// aborts the whole pass with no partial write.
    pub request_timeout_secs: u64,
}

/// Static key gating operator-only routes (submit, reconcile, void,
/// chargeback pipeline). Session/2FA auth is handled upstream.
#[derive(Deserialize, Clone, Debug)]
pub struct OperatorConfig {
    pub api_key: Secret<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct BlacklistConfig {
    /// Chargeback reason codes that trigger automatic blacklisting.
    /// Gateway reason-code taxonomies evolve, so this is configuration,
    /// not a compiled-in constant.
    pub trigger_reason_codes: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("SETTLEMENT_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("SETTLEMENT_SERVICE_PORT")
            .unwrap_or_else(|_| "3006".to_string())
            .parse()?;

        let db_url =
            env::var("SETTLEMENT_DATABASE_URL").expect("SETTLEMENT_DATABASE_URL must be set");
        let db_name =
            env::var("SETTLEMENT_DATABASE_NAME").unwrap_or_else(|_| "settlement_db".to_string());

        let emp_base_url = env::var("EMP_API_BASE_URL")
            .unwrap_or_else(|_| "https://gate.emerchantpay.test/v1".to_string());
        let emp_merchant_id = env::var("EMP_MERCHANT_ID").unwrap_or_default();
        let emp_api_key = env::var("EMP_API_KEY").unwrap_or_default();
        let emp_webhook_secret = env::var("EMP_WEBHOOK_SECRET").unwrap_or_default();
        let emp_timeout = env::var("EMP_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let operator_api_key = env::var("SETTLEMENT_OPERATOR_API_KEY").unwrap_or_default();

        let trigger_reason_codes = env::var("BLACKLIST_TRIGGER_REASON_CODES")
            .unwrap_or_else(|_| "R04,R02".to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                db_name,
            },
            emp: EmpConfig {
                api_base_url: emp_base_url,
                merchant_id: emp_merchant_id,
                api_key: Secret::new(emp_api_key),
                webhook_secret: Secret::new(emp_webhook_secret),
                request_timeout_secs: emp_timeout,
            },
            operator: OperatorConfig {
                api_key: Secret::new(operator_api_key),
            },
            blacklist: BlacklistConfig {
                trigger_reason_codes,
            },
            service_name: "settlement-service".to_string(),
        })
    }
}
