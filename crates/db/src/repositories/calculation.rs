use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use commissions_core::calculator::trace::CalculationMetadata;
use commissions_core::domain::calculation::{
    CalculationId, CalculationStatus, CommissionCalculation,
};
use commissions_core::domain::plan::PlanId;
use commissions_core::domain::transaction::{SalespersonId, TransactionId};

use super::{
    decode, parse_decimal, parse_timestamp, CalculationRepository, InsertOutcome,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlCalculationRepository {
    pool: DbPool,
}

impl SqlCalculationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn encode_metadata(calculation: &CommissionCalculation) -> Result<Option<String>, RepositoryError> {
    calculation
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| RepositoryError::Decode(format!("metadata: {e}")))
}

fn row_to_calculation(row: &SqliteRow) -> Result<CommissionCalculation, RepositoryError> {
    let status: String = decode(row, "status")?;
    let amount: String = decode(row, "amount")?;
    let metadata: Option<String> = decode(row, "metadata")?;
    let created_at: String = decode(row, "created_at")?;
    let updated_at: String = decode(row, "updated_at")?;

    let metadata = metadata
        .map(|json| serde_json::from_str::<CalculationMetadata>(&json))
        .transpose()
        .map_err(|e| RepositoryError::Decode(format!("metadata: {e}")))?;

    Ok(CommissionCalculation {
        id: CalculationId(decode(row, "id")?),
        sales_transaction_id: TransactionId(decode(row, "sales_transaction_id")?),
        salesperson_id: decode::<Option<String>>(row, "salesperson_id")?.map(SalespersonId),
        plan_id: PlanId(decode(row, "plan_id")?),
        status: CalculationStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{status}`")))?,
        amount: parse_decimal("amount", &amount)?,
        currency: decode(row, "currency")?,
        metadata,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl CalculationRepository for SqlCalculationRepository {
    async fn find_by_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<CommissionCalculation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, sales_transaction_id, salesperson_id, plan_id, status, amount, currency,
                    metadata, created_at, updated_at
             FROM commission_calculation WHERE sales_transaction_id = ?",
        )
        .bind(transaction_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_calculation).transpose()
    }

    async fn insert_calculation(
        &self,
        calculation: CommissionCalculation,
    ) -> Result<InsertOutcome, RepositoryError> {
        let metadata = encode_metadata(&calculation)?;

        let result = sqlx::query(
            "INSERT INTO commission_calculation (id, sales_transaction_id, salesperson_id, plan_id,
                                                 status, amount, currency, metadata,
                                                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(sales_transaction_id) DO NOTHING",
        )
        .bind(calculation.id.as_str())
        .bind(calculation.sales_transaction_id.as_str())
        .bind(calculation.salesperson_id.as_ref().map(SalespersonId::as_str))
        .bind(calculation.plan_id.as_str())
        .bind(calculation.status.as_str())
        .bind(calculation.amount.to_string())
        .bind(&calculation.currency)
        .bind(metadata)
        .bind(calculation.created_at.to_rfc3339())
        .bind(calculation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::Inserted);
        }

        let existing = self
            .find_by_transaction(&calculation.sales_transaction_id)
            .await?
            .ok_or_else(|| {
                RepositoryError::NotFound(format!(
                    "calculation for transaction `{}` was neither inserted nor found",
                    calculation.sales_transaction_id
                ))
            })?;
        Ok(InsertOutcome::AlreadyCalculated { existing_id: existing.id })
    }

    async fn update_calculation(
        &self,
        calculation: &CommissionCalculation,
    ) -> Result<(), RepositoryError> {
        let metadata = encode_metadata(calculation)?;

        let result = sqlx::query(
            "UPDATE commission_calculation
             SET salesperson_id = ?, plan_id = ?, status = ?, amount = ?, currency = ?,
                 metadata = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(calculation.salesperson_id.as_ref().map(SalespersonId::as_str))
        .bind(calculation.plan_id.as_str())
        .bind(calculation.status.as_str())
        .bind(calculation.amount.to_string())
        .bind(&calculation.currency)
        .bind(metadata)
        .bind(calculation.updated_at.to_rfc3339())
        .bind(calculation.id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "commission calculation `{}`",
                calculation.id
            )));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: &CalculationId,
        status: CalculationStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE commission_calculation SET status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(updated_at.to_rfc3339())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("commission calculation `{id}`")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use commissions_core::domain::calculation::{
        CalculationId, CalculationStatus, CommissionCalculation,
    };
    use commissions_core::domain::plan::{CommissionPlan, PlanId};
    use commissions_core::domain::transaction::{OrganizationId, SalesTransaction, TransactionId};

    use super::SqlCalculationRepository;
    use crate::repositories::{
        CalculationRepository, InsertOutcome, PlanRepository, SqlPlanRepository,
        SqlTransactionRepository, TransactionRepository,
    };
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlCalculationRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        SqlPlanRepository::new(pool.clone())
            .save_plan(CommissionPlan::new(
                PlanId::new("P-1"),
                OrganizationId::new("org-1"),
                "FY26",
            ))
            .await
            .expect("save plan");
        SqlTransactionRepository::new(pool.clone())
            .save_transaction(SalesTransaction::sale(
                TransactionId::new("T-1"),
                OrganizationId::new("org-1"),
                Decimal::new(1000, 0),
                NaiveDate::from_ymd_opt(2026, 2, 1).expect("valid date"),
            ))
            .await
            .expect("save transaction");

        SqlCalculationRepository::new(pool)
    }

    fn calculation(id: &str) -> CommissionCalculation {
        let now = Utc::now();
        CommissionCalculation {
            id: CalculationId::new(id),
            sales_transaction_id: TransactionId::new("T-1"),
            salesperson_id: None,
            plan_id: PlanId::new("P-1"),
            status: CalculationStatus::Calculated,
            amount: Decimal::new(10_000, 2),
            currency: "USD".to_string(),
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn second_insert_for_the_same_transaction_is_reported_not_written() {
        let repo = setup().await;

        let first = repo.insert_calculation(calculation("C-1")).await.expect("first insert");
        let second = repo.insert_calculation(calculation("C-2")).await.expect("second insert");

        assert_eq!(first, InsertOutcome::Inserted);
        assert_eq!(
            second,
            InsertOutcome::AlreadyCalculated { existing_id: CalculationId::new("C-1") }
        );

        let stored = repo
            .find_by_transaction(&TransactionId::new("T-1"))
            .await
            .expect("find")
            .expect("calculation exists");
        assert_eq!(stored.id.as_str(), "C-1");
        assert_eq!(stored.amount.to_string(), "100.00");
    }

    #[tokio::test]
    async fn status_updates_persist() {
        let repo = setup().await;
        repo.insert_calculation(calculation("C-1")).await.expect("insert");

        repo.update_status(&CalculationId::new("C-1"), CalculationStatus::Approved, Utc::now())
            .await
            .expect("update status");

        let stored = repo
            .find_by_transaction(&TransactionId::new("T-1"))
            .await
            .expect("find")
            .expect("calculation exists");
        assert_eq!(stored.status, CalculationStatus::Approved);
        assert!(repo
            .update_status(&CalculationId::new("missing"), CalculationStatus::Paid, Utc::now())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn full_updates_rewrite_the_row_under_the_same_id() {
        let repo = setup().await;
        repo.insert_calculation(calculation("C-1")).await.expect("insert");

        let mut revised = calculation("C-1");
        revised.amount = Decimal::new(12_000, 2);
        revised.status = CalculationStatus::Calculated;
        repo.update_calculation(&revised).await.expect("update calculation");

        let stored = repo
            .find_by_transaction(&TransactionId::new("T-1"))
            .await
            .expect("find")
            .expect("calculation exists");
        assert_eq!(stored.id.as_str(), "C-1");
        assert_eq!(stored.amount.to_string(), "120.00");
        assert!(repo.update_calculation(&calculation("missing")).await.is_err());
    }
}
