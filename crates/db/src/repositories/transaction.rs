use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;

use commissions_core::domain::rule::{ClientId, ProductCategoryId, ProjectId, TerritoryId};
use commissions_core::domain::transaction::{
    OrganizationId, SalesTransaction, SalespersonId, TransactionId, TransactionKind,
};

use super::{decode, parse_decimal, RepositoryError, TransactionRepository};
use crate::DbPool;

const TRANSACTION_COLUMNS: &str = "id, organization_id, amount, transaction_date, kind,
    project_id, client_id, client_tier, product_category_id, territory_id, salesperson_id,
    parent_transaction_id";

pub struct SqlTransactionRepository {
    pool: DbPool,
}

impl SqlTransactionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_transaction(row: &SqliteRow) -> Result<SalesTransaction, RepositoryError> {
    let amount: String = decode(row, "amount")?;
    let transaction_date: String = decode(row, "transaction_date")?;
    let kind: String = decode(row, "kind")?;

    Ok(SalesTransaction {
        id: TransactionId(decode(row, "id")?),
        organization_id: OrganizationId(decode(row, "organization_id")?),
        amount: parse_decimal("amount", &amount)?,
        transaction_date: NaiveDate::parse_from_str(&transaction_date, "%Y-%m-%d").map_err(
            |e| RepositoryError::Decode(format!("transaction_date `{transaction_date}`: {e}")),
        )?,
        kind: TransactionKind::parse(&kind)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown transaction kind `{kind}`")))?,
        project_id: decode::<Option<String>>(row, "project_id")?.map(ProjectId),
        client_id: decode::<Option<String>>(row, "client_id")?.map(ClientId),
        client_tier: decode(row, "client_tier")?,
        product_category_id: decode::<Option<String>>(row, "product_category_id")?
            .map(ProductCategoryId),
        territory_id: decode::<Option<String>>(row, "territory_id")?.map(TerritoryId),
        salesperson_id: decode::<Option<String>>(row, "salesperson_id")?.map(SalespersonId),
        parent_transaction_id: decode::<Option<String>>(row, "parent_transaction_id")?
            .map(TransactionId),
    })
}

#[async_trait::async_trait]
impl TransactionRepository for SqlTransactionRepository {
    async fn find_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<SalesTransaction>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM sales_transaction WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn save_transaction(
        &self,
        transaction: SalesTransaction,
    ) -> Result<(), RepositoryError> {
        sqlx::query(&format!(
            "INSERT INTO sales_transaction ({TRANSACTION_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 amount = excluded.amount,
                 transaction_date = excluded.transaction_date,
                 kind = excluded.kind,
                 project_id = excluded.project_id,
                 client_id = excluded.client_id,
                 client_tier = excluded.client_tier,
                 product_category_id = excluded.product_category_id,
                 territory_id = excluded.territory_id,
                 salesperson_id = excluded.salesperson_id,
                 parent_transaction_id = excluded.parent_transaction_id"
        ))
        .bind(transaction.id.as_str())
        .bind(transaction.organization_id.as_str())
        .bind(transaction.amount.to_string())
        .bind(transaction.transaction_date.format("%Y-%m-%d").to_string())
        .bind(transaction.kind.as_str())
        .bind(transaction.project_id.as_ref().map(ProjectId::as_str))
        .bind(transaction.client_id.as_ref().map(ClientId::as_str))
        .bind(transaction.client_tier.as_deref())
        .bind(transaction.product_category_id.as_ref().map(ProductCategoryId::as_str))
        .bind(transaction.territory_id.as_ref().map(TerritoryId::as_str))
        .bind(transaction.salesperson_id.as_ref().map(SalespersonId::as_str))
        .bind(transaction.parent_transaction_id.as_ref().map(TransactionId::as_str))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_linked_returns(
        &self,
        parent_id: &TransactionId,
    ) -> Result<Vec<SalesTransaction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM sales_transaction
             WHERE parent_transaction_id = ? AND kind <> 'SALE'
             ORDER BY id ASC"
        ))
        .bind(parent_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_transaction).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use commissions_core::domain::rule::{ClientId, TerritoryId};
    use commissions_core::domain::transaction::{
        OrganizationId, SalesTransaction, TransactionId, TransactionKind,
    };

    use super::SqlTransactionRepository;
    use crate::repositories::TransactionRepository;
    use crate::{connect_with_settings, migrations};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 15).expect("valid date")
    }

    #[tokio::test]
    async fn lists_only_returns_linked_to_the_parent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlTransactionRepository::new(pool);

        let mut sale = SalesTransaction::sale(
            TransactionId::new("T-1"),
            OrganizationId::new("org-1"),
            "1000.00".parse().expect("decimal"),
            date(),
        );
        sale.client_id = Some(ClientId::new("CL-1"));
        sale.territory_id = Some(TerritoryId::new("EMEA"));
        let other = SalesTransaction::sale(
            TransactionId::new("T-2"),
            OrganizationId::new("org-1"),
            Decimal::new(300, 0),
            date(),
        );
        let refund = SalesTransaction::linked_return(
            TransactionId::new("T-1-R1"),
            &sale,
            Decimal::new(-200, 0),
            date(),
        );
        let foreign_refund = SalesTransaction::linked_return(
            TransactionId::new("T-2-R1"),
            &other,
            Decimal::new(-50, 0),
            date(),
        );

        for transaction in [sale.clone(), other, refund.clone(), foreign_refund] {
            repo.save_transaction(transaction).await.expect("save transaction");
        }

        let stored = repo
            .find_transaction(&TransactionId::new("T-1"))
            .await
            .expect("find")
            .expect("sale exists");
        assert_eq!(stored, sale);

        let linked = repo.list_linked_returns(&TransactionId::new("T-1")).await.expect("linked");
        assert_eq!(linked, vec![refund]);
        assert_eq!(linked[0].kind, TransactionKind::Return);
    }
}
