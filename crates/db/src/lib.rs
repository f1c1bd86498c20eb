pub mod audit;
pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod service;

pub use audit::TracingAuditSink;
pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use repositories::{InsertOutcome, RepositoryError};
pub use service::{CalculationResult, CommissionService, ServiceError};
