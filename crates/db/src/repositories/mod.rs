use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;

use commissions_core::domain::calculation::{
    CalculationId, CalculationStatus, CommissionCalculation,
};
use commissions_core::domain::plan::{CommissionPlan, PlanId};
use commissions_core::domain::rule::CommissionRule;
use commissions_core::domain::transaction::{OrganizationId, SalesTransaction, TransactionId};

pub mod calculation;
pub mod memory;
pub mod plan;
pub mod transaction;

pub use calculation::SqlCalculationRepository;
pub use memory::{
    InMemoryCalculationRepository, InMemoryPlanRepository, InMemoryTransactionRepository,
};
pub use plan::SqlPlanRepository;
pub use transaction::SqlTransactionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result of an at-most-once calculation insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyCalculated { existing_id: CalculationId },
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn find_plan(&self, id: &PlanId) -> Result<Option<CommissionPlan>, RepositoryError>;
    async fn list_active_plans(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<CommissionPlan>, RepositoryError>;
    async fn save_plan(&self, plan: CommissionPlan) -> Result<(), RepositoryError>;
    async fn delete_plan(&self, id: &PlanId) -> Result<(), RepositoryError>;
    async fn list_rules(&self, plan_id: &PlanId) -> Result<Vec<CommissionRule>, RepositoryError>;
    async fn save_rule(&self, rule: CommissionRule) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn find_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<SalesTransaction>, RepositoryError>;
    async fn save_transaction(&self, transaction: SalesTransaction)
        -> Result<(), RepositoryError>;
    async fn list_linked_returns(
        &self,
        parent_id: &TransactionId,
    ) -> Result<Vec<SalesTransaction>, RepositoryError>;
}

#[async_trait]
pub trait CalculationRepository: Send + Sync {
    async fn find_by_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<CommissionCalculation>, RepositoryError>;
    /// Writes `calculation` unless one already exists for its sales transaction.
    async fn insert_calculation(
        &self,
        calculation: CommissionCalculation,
    ) -> Result<InsertOutcome, RepositoryError>;
    /// Overwrites amount, trace, plan and status of an existing row in place.
    async fn update_calculation(
        &self,
        calculation: &CommissionCalculation,
    ) -> Result<(), RepositoryError>;
    async fn update_status(
        &self,
        id: &CalculationId,
        status: CalculationStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

pub(crate) fn decode<T>(row: &SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

pub(crate) fn parse_decimal(column: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value)
        .map_err(|e| RepositoryError::Decode(format!("{column} `{value}`: {e}")))
}

pub(crate) fn parse_optional_decimal(
    column: &str,
    value: Option<String>,
) -> Result<Option<Decimal>, RepositoryError> {
    value.map(|value| parse_decimal(column, &value)).transpose()
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column} `{value}`: {e}")))
}
