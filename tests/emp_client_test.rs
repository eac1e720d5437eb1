//! EMP gateway client tests against a mock HTTP server.

use secrecy::Secret;
use serde_json::json;
use settlement_service::config::EmpConfig;
use settlement_service::services::emp::{EmpClient, SubmitTransactionRequest};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> EmpClient {
    client_with_timeout(server, 5)
}

fn client_with_timeout(server: &MockServer, timeout_secs: u64) -> EmpClient {
    EmpClient::new(EmpConfig {
        api_base_url: server.uri(),
        merchant_id: "merchant_test".to_string(),
        api_key: Secret::new("api_key_test".to_string()),
        webhook_secret: Secret::new("webhook_secret_test".to_string()),
        request_timeout_secs: timeout_secs,
    })
}

fn submit_request() -> SubmitTransactionRequest {
    SubmitTransactionRequest {
        transaction_id: "batch1-0".to_string(),
        amount: 12500,
        bank_account_number: "12345678".to_string(),
        customer_name: Some("Jo Bloggs".to_string()),
        customer_email: Some("jo@example.com".to_string()),
    }
}

#[tokio::test]
async fn submit_transaction_parses_gateway_acknowledgement() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "unique_id": "emp-0001",
            "status": "pending_async",
            "message": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let response = client.submit_transaction(&submit_request()).await.unwrap();

    assert_eq!(response.unique_id, "emp-0001");
    assert_eq!(response.status, "pending_async");
}

#[tokio::test]
async fn submit_transaction_surfaces_gateway_error_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transactions"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "error": {
                "code": "INVALID_ACCOUNT",
                "message": "Account number failed validation"
            }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.submit_transaction(&submit_request()).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("INVALID_ACCOUNT"));
    assert!(message.contains("Account number failed validation"));
}

#[tokio::test]
async fn list_transactions_returns_remote_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transactions": [
                {
                    "unique_id": "emp-0001",
                    "reference_transaction_id": "batch1-0",
                    "status": "approved",
                    "reason_code": null,
                    "message": null,
                    "timestamp": "2026-02-01T10:00:00Z"
                },
                {
                    "unique_id": "emp-0002",
                    "reference_transaction_id": "batch1-1",
                    "status": "declined",
                    "reason_code": "R02",
                    "message": "Account Closed",
                    "timestamp": null
                }
            ]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let transactions = client.list_transactions(None).await.unwrap();

    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0].unique_id, "emp-0001");
    assert_eq!(transactions[0].status, "approved");
    assert_eq!(transactions[1].reason_code.as_deref(), Some("R02"));
    assert_eq!(transactions[1].message.as_deref(), Some("Account Closed"));
}

#[tokio::test]
async fn list_transactions_passes_the_window_as_query_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transactions"))
        .and(query_param("start_date", "2026-01-01"))
        .and(query_param("end_date", "2026-01-31"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "transactions": [] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let window = Some((
        chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        chrono::NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
    ));
    let transactions = client.list_transactions(window).await.unwrap();

    assert!(transactions.is_empty());
}

#[tokio::test]
async fn list_transactions_fails_when_gateway_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transactions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.list_transactions(None).await.unwrap_err();

    // The reconciliation engine aborts with no partial write on this error
    assert!(err.to_string().contains("upstream unavailable"));
}

#[tokio::test]
async fn list_transactions_times_out_on_a_hung_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transactions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "transactions": [] }))
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = client_with_timeout(&server, 1);
    let result = client.list_transactions(None).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn void_transaction_parses_acknowledgement() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transactions/emp-0001/void"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "voided",
            "message": "Transaction voided"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let response = client.void_transaction("emp-0001", "batch1-0").await.unwrap();

    assert_eq!(response.status, "voided");
    assert_eq!(response.message.as_deref(), Some("Transaction voided"));
}

#[tokio::test]
async fn unconfigured_client_refuses_without_calling_the_gateway() {
    let server = MockServer::start().await;

    let client = EmpClient::new(EmpConfig {
        api_base_url: server.uri(),
        merchant_id: String::new(),
        api_key: Secret::new(String::new()),
        webhook_secret: Secret::new(String::new()),
        request_timeout_secs: 5,
    });

    let err = client.list_transactions(None).await.unwrap_err();
    assert!(err.to_string().contains("not configured"));
    assert!(server.received_requests().await.unwrap().is_empty());
}
