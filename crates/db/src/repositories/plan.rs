use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use commissions_core::domain::plan::{CalculationBasis, CommissionPlan, PlanId};
use commissions_core::domain::rule::{
    ClientId, CommissionRule, Priority, ProductCategoryId, ProjectId, RuleId, RuleKind,
    RuleScope, RuleType, TerritoryId,
};
use commissions_core::domain::transaction::OrganizationId;

use super::{
    decode, parse_decimal, parse_optional_decimal, parse_timestamp, PlanRepository,
    RepositoryError,
};
use crate::DbPool;

const RULE_COLUMNS: &str = "id, plan_id, rule_type, percentage, flat_amount, threshold,
    tier_percentage, base_percentage, min_amount, max_amount, territory_id, client_id,
    project_id, product_category_id, priority, basis, is_active, created_at";

pub struct SqlPlanRepository {
    pool: DbPool,
}

impl SqlPlanRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_basis(value: &str) -> Result<CalculationBasis, RepositoryError> {
    CalculationBasis::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown calculation basis `{value}`")))
}

fn row_to_plan(row: &SqliteRow) -> Result<CommissionPlan, RepositoryError> {
    let base_rate: Option<String> = decode(row, "base_rate")?;
    let basis: String = decode(row, "basis")?;
    let is_active: i64 = decode(row, "is_active")?;

    Ok(CommissionPlan {
        id: PlanId(decode(row, "id")?),
        organization_id: OrganizationId(decode(row, "organization_id")?),
        name: decode(row, "name")?,
        project_id: decode::<Option<String>>(row, "project_id")?.map(ProjectId),
        is_active: is_active != 0,
        base_rate: parse_optional_decimal("base_rate", base_rate)?,
        basis: parse_basis(&basis)?,
    })
}

fn required_decimal(
    column: &str,
    value: Option<String>,
) -> Result<rust_decimal::Decimal, RepositoryError> {
    let value = value.ok_or_else(|| {
        RepositoryError::Decode(format!("{column} is required for this rule type"))
    })?;
    parse_decimal(column, &value)
}

fn row_to_rule(row: &SqliteRow) -> Result<CommissionRule, RepositoryError> {
    let rule_type: String = decode(row, "rule_type")?;
    let rule_type = RuleType::parse(&rule_type)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown rule type `{rule_type}`")))?;

    let kind = match rule_type {
        RuleType::Percentage => RuleKind::Percentage {
            percentage: required_decimal("percentage", decode(row, "percentage")?)?,
        },
        RuleType::FlatAmount => RuleKind::FlatAmount {
            amount: required_decimal("flat_amount", decode(row, "flat_amount")?)?,
        },
        RuleType::Tiered => RuleKind::Tiered {
            threshold: required_decimal("threshold", decode(row, "threshold")?)?,
            tier_percentage: required_decimal("tier_percentage", decode(row, "tier_percentage")?)?,
            base_percentage: parse_optional_decimal(
                "base_percentage",
                decode(row, "base_percentage")?,
            )?,
        },
    };

    let priority: i64 = decode(row, "priority")?;
    let basis: Option<String> = decode(row, "basis")?;
    let is_active: i64 = decode(row, "is_active")?;
    let created_at: String = decode(row, "created_at")?;

    Ok(CommissionRule {
        id: RuleId(decode(row, "id")?),
        plan_id: PlanId(decode(row, "plan_id")?),
        kind,
        min_amount: parse_optional_decimal("min_amount", decode(row, "min_amount")?)?,
        max_amount: parse_optional_decimal("max_amount", decode(row, "max_amount")?)?,
        scope: RuleScope {
            territory_id: decode::<Option<String>>(row, "territory_id")?.map(TerritoryId),
            client_id: decode::<Option<String>>(row, "client_id")?.map(ClientId),
            project_id: decode::<Option<String>>(row, "project_id")?.map(ProjectId),
            product_category_id: decode::<Option<String>>(row, "product_category_id")?
                .map(ProductCategoryId),
        },
        priority: Priority(u32::try_from(priority).map_err(|e| {
            RepositoryError::Decode(format!("priority `{priority}`: {e}"))
        })?),
        basis: basis.as_deref().map(parse_basis).transpose()?,
        is_active: is_active != 0,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

#[async_trait::async_trait]
impl PlanRepository for SqlPlanRepository {
    async fn find_plan(&self, id: &PlanId) -> Result<Option<CommissionPlan>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, organization_id, name, project_id, is_active, base_rate, basis
             FROM commission_plan WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_plan).transpose()
    }

    async fn list_active_plans(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<CommissionPlan>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, organization_id, name, project_id, is_active, base_rate, basis
             FROM commission_plan
             WHERE organization_id = ? AND is_active = 1
             ORDER BY id ASC",
        )
        .bind(organization_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_plan).collect()
    }

    async fn save_plan(&self, plan: CommissionPlan) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO commission_plan (id, organization_id, name, project_id, is_active,
                                          base_rate, basis, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 organization_id = excluded.organization_id,
                 name = excluded.name,
                 project_id = excluded.project_id,
                 is_active = excluded.is_active,
                 base_rate = excluded.base_rate,
                 basis = excluded.basis",
        )
        .bind(plan.id.as_str())
        .bind(plan.organization_id.as_str())
        .bind(&plan.name)
        .bind(plan.project_id.as_ref().map(ProjectId::as_str))
        .bind(i64::from(plan.is_active))
        .bind(plan.base_rate.map(|rate| rate.to_string()))
        .bind(plan.basis.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_plan(&self, id: &PlanId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM commission_plan WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("commission plan `{id}`")));
        }
        Ok(())
    }

    async fn list_rules(&self, plan_id: &PlanId) -> Result<Vec<CommissionRule>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM commission_rule
             WHERE plan_id = ?
             ORDER BY priority DESC, created_at DESC, id DESC"
        ))
        .bind(plan_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_rule).collect()
    }

    async fn save_rule(&self, rule: CommissionRule) -> Result<(), RepositoryError> {
        let (percentage, flat_amount, threshold, tier_percentage, base_percentage) =
            match &rule.kind {
                RuleKind::Percentage { percentage } => {
                    (Some(percentage.to_string()), None, None, None, None)
                }
                RuleKind::FlatAmount { amount } => {
                    (None, Some(amount.to_string()), None, None, None)
                }
                RuleKind::Tiered { threshold, tier_percentage, base_percentage } => (
                    None,
                    None,
                    Some(threshold.to_string()),
                    Some(tier_percentage.to_string()),
                    base_percentage.map(|base| base.to_string()),
                ),
            };

        sqlx::query(&format!(
            "INSERT INTO commission_rule ({RULE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 rule_type = excluded.rule_type,
                 percentage = excluded.percentage,
                 flat_amount = excluded.flat_amount,
                 threshold = excluded.threshold,
                 tier_percentage = excluded.tier_percentage,
                 base_percentage = excluded.base_percentage,
                 min_amount = excluded.min_amount,
                 max_amount = excluded.max_amount,
                 territory_id = excluded.territory_id,
                 client_id = excluded.client_id,
                 project_id = excluded.project_id,
                 product_category_id = excluded.product_category_id,
                 priority = excluded.priority,
                 basis = excluded.basis,
                 is_active = excluded.is_active"
        ))
        .bind(rule.id.as_str())
        .bind(rule.plan_id.as_str())
        .bind(rule.rule_type().as_str())
        .bind(percentage)
        .bind(flat_amount)
        .bind(threshold)
        .bind(tier_percentage)
        .bind(base_percentage)
        .bind(rule.min_amount.map(|min| min.to_string()))
        .bind(rule.max_amount.map(|max| max.to_string()))
        .bind(rule.scope.territory_id.as_ref().map(TerritoryId::as_str))
        .bind(rule.scope.client_id.as_ref().map(ClientId::as_str))
        .bind(rule.scope.project_id.as_ref().map(ProjectId::as_str))
        .bind(rule.scope.product_category_id.as_ref().map(ProductCategoryId::as_str))
        .bind(i64::from(rule.priority.0))
        .bind(rule.basis.map(CalculationBasis::as_str))
        .bind(i64::from(rule.is_active))
        .bind(rule.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
