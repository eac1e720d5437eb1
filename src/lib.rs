pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

use config::Config;
use middleware::{metrics_middleware, operator_auth_middleware, request_id_middleware};
use services::{
    init_metrics, BatchRepository, BlacklistStore, ChargebackRepository, EmpClient,
    ReconciliationService,
};

#[derive(Clone)]
pub struct AppState {
    pub db: mongodb::Database,
    pub config: Config,
    pub batches: BatchRepository,
    pub chargebacks: ChargebackRepository,
    pub blacklist: BlacklistStore,
    pub emp: EmpClient,
    pub reconciliation: ReconciliationService,
}

pub struct Application {
    port: u16,
    router: Router,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let mut client_options = ClientOptions::parse(config.database.url.expose_secret()).await?;
        client_options.app_name = Some("settlement-service".to_string());

        let client = Client::with_options(client_options)?;
        let db = client.database(&config.database.db_name);

        let batches = BatchRepository::new(&db);
        let chargebacks = ChargebackRepository::new(&db);
        let blacklist = BlacklistStore::new(&db);

        batches.init_indexes().await?;
        chargebacks.init_indexes().await?;
        // The unique index is what makes concurrent duplicate adds safe
        blacklist.init_indexes().await?;

        let emp = EmpClient::new(config.emp.clone());
        if emp.is_configured() {
            tracing::info!("EMP gateway client initialized");
        } else {
            tracing::warn!(
                "EMP credentials not configured - submission and reconciliation will be refused"
            );
        }

        let reconciliation = ReconciliationService::new(emp.clone(), batches.clone());

        init_metrics();

        let state = AppState {
            db,
            config: config.clone(),
            batches,
            chargebacks,
            blacklist,
            emp,
            reconciliation,
        };

        // Routes that reach the gateway or mutate money-moving state
        let operator_routes = Router::new()
            .route("/batches/:id/submit", post(handlers::batches::submit_batch))
            .route(
                "/batches/:id/reconcile",
                post(handlers::batches::reconcile_batch),
            )
            .route(
                "/batches/:id/rows/:row_id/void",
                post(handlers::batches::void_row),
            )
            .route(
                "/blacklist/run-chargebacks",
                post(handlers::blacklist::run_chargeback_pipeline),
            )
            .route_layer(from_fn_with_state(
                state.clone(),
                operator_auth_middleware,
            ));

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_endpoint))
            .route(
                "/batches",
                post(handlers::batches::create_batch).get(handlers::batches::list_batches),
            )
            .route("/batches/:id", get(handlers::batches::get_batch))
            .route(
                "/batches/:id/filter-blacklisted",
                post(handlers::batches::filter_batch),
            )
            .route("/blacklist", post(handlers::blacklist::add_entry))
            .route(
                "/blacklist/check",
                post(handlers::blacklist::check_identifiers),
            )
            .route("/webhooks/emp", post(handlers::chargebacks::webhook))
            .merge(operator_routes)
            .layer(from_fn(metrics_middleware))
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                    )
                }),
            )
            .with_state(state);

        Ok(Self {
            port: config.server.port,
            router,
        })
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("Listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router).await?;

        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
