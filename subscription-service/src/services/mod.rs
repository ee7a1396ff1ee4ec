//! Services module for subscription-service.

pub mod database;
pub mod metrics;
pub mod repository;
pub mod subscription;
pub mod tx;

pub use database::Database;
pub use metrics::{get_metrics, init_metrics, record_operation};
pub use repository::PgSubscriptionRepository;
pub use subscription::SubscriptionService;
pub use tx::PgTxProvider;
