pub mod auth;
pub mod metrics;
pub mod tracing;

pub use auth::operator_auth_middleware;
pub use metrics::metrics_middleware;
pub use tracing::request_id_middleware;
