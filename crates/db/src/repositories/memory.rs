use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use commissions_core::domain::calculation::{
    CalculationId, CalculationStatus, CommissionCalculation,
};
use commissions_core::domain::plan::{CommissionPlan, PlanId};
use commissions_core::domain::rule::CommissionRule;
use commissions_core::domain::transaction::{OrganizationId, SalesTransaction, TransactionId};
use commissions_core::precedence::compare_precedence;

use super::{
    CalculationRepository, InsertOutcome, PlanRepository, RepositoryError, TransactionRepository,
};

#[derive(Default)]
pub struct InMemoryPlanRepository {
    plans: RwLock<HashMap<String, CommissionPlan>>,
    rules: RwLock<HashMap<String, CommissionRule>>,
}

#[async_trait::async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn find_plan(&self, id: &PlanId) -> Result<Option<CommissionPlan>, RepositoryError> {
        let plans = self.plans.read().await;
        Ok(plans.get(id.as_str()).cloned())
    }

    async fn list_active_plans(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<CommissionPlan>, RepositoryError> {
        let plans = self.plans.read().await;
        let mut active: Vec<CommissionPlan> = plans
            .values()
            .filter(|plan| plan.is_active && &plan.organization_id == organization_id)
            .cloned()
            .collect();
        active.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(active)
    }

    async fn save_plan(&self, plan: CommissionPlan) -> Result<(), RepositoryError> {
        let mut plans = self.plans.write().await;
        plans.insert(plan.id.0.clone(), plan);
        Ok(())
    }

    async fn delete_plan(&self, id: &PlanId) -> Result<(), RepositoryError> {
        let mut plans = self.plans.write().await;
        if plans.remove(id.as_str()).is_none() {
            return Err(RepositoryError::NotFound(format!("commission plan `{id}`")));
        }
        let mut rules = self.rules.write().await;
        rules.retain(|_, rule| &rule.plan_id != id);
        Ok(())
    }

    async fn list_rules(&self, plan_id: &PlanId) -> Result<Vec<CommissionRule>, RepositoryError> {
        let rules = self.rules.read().await;
        let mut listed: Vec<CommissionRule> =
            rules.values().filter(|rule| &rule.plan_id == plan_id).cloned().collect();
        listed.sort_by(compare_precedence);
        Ok(listed)
    }

    async fn save_rule(&self, rule: CommissionRule) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write().await;
        rules.insert(rule.id.0.clone(), rule);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTransactionRepository {
    transactions: RwLock<HashMap<String, SalesTransaction>>,
    unavailable: RwLock<bool>,
}

impl InMemoryTransactionRepository {
    /// Makes every subsequent linked-returns lookup fail.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }
}

#[async_trait::async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn find_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<SalesTransaction>, RepositoryError> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(id.as_str()).cloned())
    }

    async fn save_transaction(
        &self,
        transaction: SalesTransaction,
    ) -> Result<(), RepositoryError> {
        let mut transactions = self.transactions.write().await;
        transactions.insert(transaction.id.0.clone(), transaction);
        Ok(())
    }

    async fn list_linked_returns(
        &self,
        parent_id: &TransactionId,
    ) -> Result<Vec<SalesTransaction>, RepositoryError> {
        if *self.unavailable.read().await {
            return Err(RepositoryError::Decode("returns ledger unavailable".to_string()));
        }
        let transactions = self.transactions.read().await;
        let mut linked: Vec<SalesTransaction> = transactions
            .values()
            .filter(|transaction| transaction.parent_transaction_id.as_ref() == Some(parent_id))
            .cloned()
            .collect();
        linked.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(linked)
    }
}

#[derive(Default)]
pub struct InMemoryCalculationRepository {
    calculations: RwLock<HashMap<String, CommissionCalculation>>,
}

#[async_trait::async_trait]
impl CalculationRepository for InMemoryCalculationRepository {
    async fn find_by_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<CommissionCalculation>, RepositoryError> {
        let calculations = self.calculations.read().await;
        Ok(calculations.get(transaction_id.as_str()).cloned())
    }

    async fn insert_calculation(
        &self,
        calculation: CommissionCalculation,
    ) -> Result<InsertOutcome, RepositoryError> {
        let mut calculations = self.calculations.write().await;
        if let Some(existing) = calculations.get(calculation.sales_transaction_id.as_str()) {
            return Ok(InsertOutcome::AlreadyCalculated { existing_id: existing.id.clone() });
        }
        calculations.insert(calculation.sales_transaction_id.0.clone(), calculation);
        Ok(InsertOutcome::Inserted)
    }

    async fn update_calculation(
        &self,
        calculation: &CommissionCalculation,
    ) -> Result<(), RepositoryError> {
        let mut calculations = self.calculations.write().await;
        let stored = calculations
            .values_mut()
            .find(|stored| stored.id == calculation.id)
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("commission calculation `{}`", calculation.id))
            })?;
        *stored = calculation.clone();
        Ok(())
    }

    async fn update_status(
        &self,
        id: &CalculationId,
        status: CalculationStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut calculations = self.calculations.write().await;
        let calculation = calculations
            .values_mut()
            .find(|calculation| &calculation.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("commission calculation `{id}`")))?;
        calculation.status = status;
        calculation.updated_at = updated_at;
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
    use commissions_core::domain::plan::PlanId;
    use commissions_core::domain::transaction::{OrganizationId, SalesTransaction, TransactionId};

    use crate::repositories::{
        CalculationRepository, InMemoryCalculationRepository, InMemoryTransactionRepository,
        InsertOutcome, TransactionRepository,
    };

    #[tokio::test]
    async fn in_memory_calculations_are_at_most_once_per_transaction() {
        let repo = InMemoryCalculationRepository::default();
        let now = Utc::now();
        let calculation = |id: &str| CommissionCalculation {
            id: CalculationId::new(id),
            sales_transaction_id: TransactionId::new("T-1"),
            salesperson_id: None,
            plan_id: PlanId::new("P-1"),
            status: CalculationStatus::Calculated,
            amount: Decimal::new(5_000, 2),
            currency: "USD".to_string(),
            metadata: None,
            created_at: now,
            updated_at: now,
        };

        assert_eq!(
            repo.insert_calculation(calculation("C-1")).await.expect("insert"),
            InsertOutcome::Inserted
        );
        assert_eq!(
            repo.insert_calculation(calculation("C-2")).await.expect("insert"),
            InsertOutcome::AlreadyCalculated { existing_id: CalculationId::new("C-1") }
        );
    }

    #[tokio::test]
    async fn unavailable_returns_ledger_fails_lookups() {
        let repo = InMemoryTransactionRepository::default();
        let sale = SalesTransaction::sale(
            TransactionId::new("T-1"),
            OrganizationId::new("org-1"),
            Decimal::new(100, 0),
            NaiveDate::from_ymd_opt(2026, 1, 5).expect("valid date"),
        );
        repo.save_transaction(sale).await.expect("save");

        assert!(repo.list_linked_returns(&TransactionId::new("T-1")).await.expect("ok").is_empty());
        repo.set_unavailable(true).await;
        assert!(repo.list_linked_returns(&TransactionId::new("T-1")).await.is_err());
    }
}
