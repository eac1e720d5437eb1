pub mod blacklist;
pub mod chargebacks;
pub mod emp;
pub mod metrics;
pub mod reconciliation;
pub mod repository;

pub use blacklist::BlacklistStore;
pub use emp::EmpClient;
pub use metrics::{get_metrics, init_metrics};
pub use reconciliation::ReconciliationService;
pub use repository::{BatchRepository, ChargebackRepository};
