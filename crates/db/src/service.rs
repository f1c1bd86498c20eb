//! Calculation service: load inputs, calculate, persist one row per transaction, and audit.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use commissions_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use commissions_core::batch::{BatchItemOutcome, BatchReport};
use commissions_core::calculator::net_sales::calculate_net_sales_amount;
use commissions_core::calculator::rounding::Currency;
use commissions_core::calculator::trace::TraceWarning;
use commissions_core::calculator::{
    CalculationContext, CommissionCalculator, CommissionOutcome, DeterministicCommissionCalculator,
};
use commissions_core::domain::calculation::{
    CalculationId, CalculationStatus, CommissionCalculation,
};
use commissions_core::domain::plan::{CommissionPlan, PlanId};
use commissions_core::domain::rule::CommissionRule;
use commissions_core::domain::transaction::{OrganizationId, SalesTransaction, TransactionId};
use commissions_core::errors::{ApplicationError, CommissionError, DomainError};
use commissions_core::precedence::{
    check_plan_health, validate_plan_values, validate_scoped_rule, PlanHealthReport,
};

use crate::audit::TracingAuditSink;
use crate::repositories::{
    CalculationRepository, InsertOutcome, PlanRepository, RepositoryError, SqlCalculationRepository,
    SqlPlanRepository, SqlTransactionRepository, TransactionRepository,
};
use crate::DbPool;

const ACTOR: &str = "commission-service";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Commission(#[from] CommissionError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("sales transaction `{0}` was not found")]
    TransactionNotFound(TransactionId),
    #[error("commission plan `{0}` was not found")]
    PlanNotFound(PlanId),
    #[error("no calculation exists for sales transaction `{0}`")]
    CalculationNotFound(TransactionId),
    #[error(
        "no active commission plan applies to transaction `{transaction_id}` \
         in organization `{organization_id}`"
    )]
    NoActivePlan { transaction_id: TransactionId, organization_id: OrganizationId },
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Commission(error) => error.kind(),
            Self::Domain(DomainError::InvalidCalculationTransition { .. }) => {
                "invalid_calculation_transition"
            }
            Self::Domain(DomainError::CalculationClosed { .. }) => "calculation_closed",
            Self::Repository(_) => "persistence",
            Self::TransactionNotFound(_) => "transaction_not_found",
            Self::PlanNotFound(_) => "plan_not_found",
            Self::CalculationNotFound(_) => "calculation_not_found",
            Self::NoActivePlan { .. } => "no_active_plan",
        }
    }
}

impl From<ServiceError> for ApplicationError {
    fn from(value: ServiceError) -> Self {
        match value {
            ServiceError::Commission(error) => Self::Commission(error),
            ServiceError::Domain(error) => Self::Domain(error),
            ServiceError::Repository(error) => Self::Persistence(error.to_string()),
            error @ (ServiceError::TransactionNotFound(_)
            | ServiceError::PlanNotFound(_)
            | ServiceError::CalculationNotFound(_)
            | ServiceError::NoActivePlan { .. }) => Self::NotFound(error.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CalculationResult {
    Calculated { calculation: CommissionCalculation, warnings: Vec<TraceWarning> },
    AlreadyCalculated { calculation: CommissionCalculation },
    Recalculated {
        calculation: CommissionCalculation,
        previous_amount: Decimal,
        warnings: Vec<TraceWarning>,
    },
    /// The stored row is approved, paid or rejected and was left untouched.
    Frozen { calculation: CommissionCalculation },
}

impl CalculationResult {
    pub fn calculation(&self) -> &CommissionCalculation {
        match self {
            Self::Calculated { calculation, .. }
            | Self::AlreadyCalculated { calculation }
            | Self::Recalculated { calculation, .. }
            | Self::Frozen { calculation } => calculation,
        }
    }
}

pub struct CommissionService {
    plans: Arc<dyn PlanRepository>,
    transactions: Arc<dyn TransactionRepository>,
    calculations: Arc<dyn CalculationRepository>,
    calculator: Arc<dyn CommissionCalculator>,
    audit: Arc<dyn AuditSink>,
    currency: Currency,
}

impl CommissionService {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        transactions: Arc<dyn TransactionRepository>,
        calculations: Arc<dyn CalculationRepository>,
        audit: Arc<dyn AuditSink>,
        currency: Currency,
    ) -> Self {
        Self {
            plans,
            transactions,
            calculations,
            calculator: Arc::new(DeterministicCommissionCalculator),
            audit,
            currency,
        }
    }

    pub fn sqlite(pool: DbPool, currency: Currency) -> Self {
        Self::new(
            Arc::new(SqlPlanRepository::new(pool.clone())),
            Arc::new(SqlTransactionRepository::new(pool.clone())),
            Arc::new(SqlCalculationRepository::new(pool)),
            Arc::new(TracingAuditSink),
            currency,
        )
    }

    pub fn with_calculator(mut self, calculator: Arc<dyn CommissionCalculator>) -> Self {
        self.calculator = calculator;
        self
    }

    /// Validates plan-level values before storing the plan.
    pub async fn save_plan(
        &self,
        plan: CommissionPlan,
        correlation_id: &str,
    ) -> Result<CommissionPlan, ServiceError> {
        if let Err(error) = validate_plan_values(&plan) {
            tracing::warn!(
                event_name = "commission.plan_rejected",
                correlation_id,
                plan_id = %plan.id,
                error_kind = error.kind(),
                "plan rejected: {error}"
            );
            self.audit.emit(
                AuditEvent::new(
                    correlation_id,
                    "plan.rejected",
                    AuditCategory::RuleAuthoring,
                    ACTOR,
                    AuditOutcome::Rejected,
                )
                .for_plan(&plan.id)
                .with_metadata("error_kind", error.kind()),
            );
            return Err(error.into());
        }

        self.plans.save_plan(plan.clone()).await?;
        self.audit.emit(
            AuditEvent::new(
                correlation_id,
                "plan.saved",
                AuditCategory::RuleAuthoring,
                ACTOR,
                AuditOutcome::Success,
            )
            .for_plan(&plan.id),
        );
        Ok(plan)
    }

    /// Validates and stores a new or edited rule, re-deriving its priority from its scope.
    pub async fn author_rule(
        &self,
        mut rule: CommissionRule,
        correlation_id: &str,
    ) -> Result<CommissionRule, ServiceError> {
        if self.plans.find_plan(&rule.plan_id).await?.is_none() {
            return Err(ServiceError::PlanNotFound(rule.plan_id.clone()));
        }

        rule.priority = rule.derived_priority();
        let existing = self.plans.list_rules(&rule.plan_id).await?;

        if let Err(error) = validate_scoped_rule(&rule, &existing) {
            tracing::warn!(
                event_name = "commission.rule_rejected",
                correlation_id,
                rule_id = %rule.id,
                plan_id = %rule.plan_id,
                error_kind = error.kind(),
                "rule rejected: {error}"
            );
            self.audit.emit(
                AuditEvent::new(
                    correlation_id,
                    "rule.rejected",
                    AuditCategory::RuleAuthoring,
                    ACTOR,
                    AuditOutcome::Rejected,
                )
                .for_plan(&rule.plan_id)
                .with_metadata("rule_id", rule.id.as_str())
                .with_metadata("error_kind", error.kind()),
            );
            return Err(error.into());
        }

        self.plans.save_rule(rule.clone()).await?;
        self.audit.emit(
            AuditEvent::new(
                correlation_id,
                "rule.saved",
                AuditCategory::RuleAuthoring,
                ACTOR,
                AuditOutcome::Success,
            )
            .for_plan(&rule.plan_id)
            .with_metadata("rule_id", rule.id.as_str())
            .with_metadata("priority", rule.priority.to_string()),
        );

        Ok(rule)
    }

    pub async fn plan_health(&self, plan_id: &PlanId) -> Result<PlanHealthReport, ServiceError> {
        let plan = self
            .plans
            .find_plan(plan_id)
            .await?
            .ok_or_else(|| ServiceError::PlanNotFound(plan_id.clone()))?;
        let rules = self.plans.list_rules(plan_id).await?;
        Ok(check_plan_health(&plan, &rules))
    }

    pub async fn calculate_transaction(
        &self,
        transaction_id: &TransactionId,
        correlation_id: &str,
    ) -> Result<CalculationResult, ServiceError> {
        if let Some(existing) = self.calculations.find_by_transaction(transaction_id).await? {
            return Ok(CalculationResult::AlreadyCalculated { calculation: existing });
        }

        let transaction = self.load_transaction(transaction_id).await?;
        let (plan, outcome) = self.run_calculator(&transaction, correlation_id).await?;
        let warnings = outcome.warnings.clone();
        let calculation = CommissionCalculation::from_outcome(
            CalculationId::new(Uuid::new_v4().to_string()),
            &transaction,
            plan.id.clone(),
            outcome,
            Utc::now(),
        );

        match self.calculations.insert_calculation(calculation.clone()).await? {
            InsertOutcome::Inserted => {
                tracing::info!(
                    event_name = "commission.calculated",
                    correlation_id,
                    transaction_id = %transaction.id,
                    plan_id = %plan.id,
                    calculation_id = %calculation.id,
                    amount = %calculation.amount,
                    currency = %calculation.currency,
                    "commission calculated"
                );
                self.audit.emit(
                    AuditEvent::new(
                        correlation_id,
                        "commission.calculated",
                        AuditCategory::Calculation,
                        ACTOR,
                        AuditOutcome::Success,
                    )
                    .for_transaction(&transaction.id)
                    .for_plan(&plan.id)
                    .with_metadata("calculation_id", calculation.id.as_str())
                    .with_metadata("amount", calculation.amount.to_string()),
                );
                Ok(CalculationResult::Calculated { calculation, warnings })
            }
            InsertOutcome::AlreadyCalculated { existing_id } => {
                tracing::info!(
                    event_name = "commission.already_calculated",
                    correlation_id,
                    transaction_id = %transaction.id,
                    calculation_id = %existing_id,
                    "concurrent calculation already persisted"
                );
                self.audit.emit(
                    AuditEvent::new(
                        correlation_id,
                        "commission.duplicate_suppressed",
                        AuditCategory::Persistence,
                        ACTOR,
                        AuditOutcome::Rejected,
                    )
                    .for_transaction(&transaction.id)
                    .with_metadata("existing_calculation_id", existing_id.as_str()),
                );
                let existing = self
                    .calculations
                    .find_by_transaction(&transaction.id)
                    .await?
                    .ok_or_else(|| ServiceError::CalculationNotFound(transaction.id.clone()))?;
                Ok(CalculationResult::AlreadyCalculated { calculation: existing })
            }
        }
    }

    /// Re-runs the calculator against current rules and rewrites an open row in place.
    /// Approved, paid and rejected rows are returned unchanged.
    pub async fn recalculate_transaction(
        &self,
        transaction_id: &TransactionId,
        correlation_id: &str,
    ) -> Result<CalculationResult, ServiceError> {
        let Some(mut calculation) = self.calculations.find_by_transaction(transaction_id).await?
        else {
            return self.calculate_transaction(transaction_id, correlation_id).await;
        };

        if !calculation.status.is_open() {
            tracing::info!(
                event_name = "commission.recalculation_skipped",
                correlation_id,
                transaction_id = %transaction_id,
                calculation_id = %calculation.id,
                status = calculation.status.as_str(),
                "calculation is frozen, stored amount kept"
            );
            return Ok(CalculationResult::Frozen { calculation });
        }

        let transaction = self.load_transaction(transaction_id).await?;
        let (plan, outcome) = self.run_calculator(&transaction, correlation_id).await?;
        let warnings = outcome.warnings.clone();
        let previous_amount = calculation.amount;

        calculation.apply_recalculation(&transaction, plan.id.clone(), outcome, Utc::now())?;
        self.calculations.update_calculation(&calculation).await?;

        tracing::info!(
            event_name = "commission.recalculated",
            correlation_id,
            transaction_id = %transaction.id,
            plan_id = %plan.id,
            calculation_id = %calculation.id,
            previous_amount = %previous_amount,
            amount = %calculation.amount,
            "commission recalculated"
        );
        self.audit.emit(
            AuditEvent::new(
                correlation_id,
                "commission.recalculated",
                AuditCategory::Calculation,
                ACTOR,
                AuditOutcome::Success,
            )
            .for_transaction(&transaction.id)
            .for_plan(&plan.id)
            .with_metadata("calculation_id", calculation.id.as_str())
            .with_metadata("previous_amount", previous_amount.to_string())
            .with_metadata("amount", calculation.amount.to_string()),
        );

        Ok(CalculationResult::Recalculated { calculation, previous_amount, warnings })
    }

    /// Recalculates each transaction in order. A failure is recorded for that item only.
    pub async fn recalculate_many(
        &self,
        transaction_ids: &[TransactionId],
        correlation_id: &str,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for transaction_id in transaction_ids {
            let outcome = match self.recalculate_transaction(transaction_id, correlation_id).await
            {
                Ok(CalculationResult::Calculated { calculation, .. }) => {
                    BatchItemOutcome::Calculated {
                        calculation_id: calculation.id,
                        amount: calculation.amount,
                    }
                }
                Ok(CalculationResult::AlreadyCalculated { calculation }) => {
                    BatchItemOutcome::AlreadyCalculated { calculation_id: calculation.id }
                }
                Ok(CalculationResult::Recalculated { calculation, previous_amount, .. }) => {
                    BatchItemOutcome::Recalculated {
                        calculation_id: calculation.id,
                        previous_amount,
                        amount: calculation.amount,
                    }
                }
                Ok(CalculationResult::Frozen { calculation }) => BatchItemOutcome::Skipped {
                    calculation_id: calculation.id,
                    status: calculation.status,
                },
                Err(error) => {
                    let kind = error.kind().to_string();
                    let message = error.to_string();
                    let user_message = ApplicationError::from(error)
                        .into_interface(correlation_id)
                        .user_message()
                        .to_string();
                    BatchItemOutcome::Failed { kind, message, user_message }
                }
            };
            report.record(transaction_id.clone(), outcome);
        }

        tracing::info!(
            event_name = "commission.batch_completed",
            correlation_id,
            total = report.items.len(),
            calculated = report.calculated(),
            recalculated = report.recalculated(),
            already_calculated = report.already_calculated(),
            skipped = report.skipped(),
            failed = report.failed(),
            "bulk recalculation finished"
        );
        report
    }

    /// Transactions without a stored calculation read as pending.
    pub async fn calculation_status(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<CalculationStatus, ServiceError> {
        Ok(self
            .calculations
            .find_by_transaction(transaction_id)
            .await?
            .map(|calculation| calculation.status)
            .unwrap_or_default())
    }

    pub async fn transition_calculation(
        &self,
        transaction_id: &TransactionId,
        next: CalculationStatus,
        correlation_id: &str,
    ) -> Result<CommissionCalculation, ServiceError> {
        let mut calculation = self
            .calculations
            .find_by_transaction(transaction_id)
            .await?
            .ok_or_else(|| ServiceError::CalculationNotFound(transaction_id.clone()))?;
        let from = calculation.status;

        calculation.transition_to(next, Utc::now())?;
        self.calculations
            .update_status(&calculation.id, calculation.status, calculation.updated_at)
            .await?;

        self.audit.emit(
            AuditEvent::new(
                correlation_id,
                "commission.status_changed",
                AuditCategory::Persistence,
                ACTOR,
                AuditOutcome::Success,
            )
            .for_transaction(transaction_id)
            .for_plan(&calculation.plan_id)
            .with_metadata("from", from.as_str())
            .with_metadata("to", next.as_str()),
        );
        Ok(calculation)
    }

    async fn load_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<SalesTransaction, ServiceError> {
        let transaction = self
            .transactions
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| ServiceError::TransactionNotFound(transaction_id.clone()))?;
        transaction.validate_for_calculation()?;
        Ok(transaction)
    }

    /// Resolves plan, rules and net sales, then runs the calculator. Nothing is persisted.
    async fn run_calculator(
        &self,
        transaction: &SalesTransaction,
        correlation_id: &str,
    ) -> Result<(CommissionPlan, CommissionOutcome), ServiceError> {
        let plan = self.select_plan(transaction).await?;
        let rules = self.plans.list_rules(&plan.id).await?;
        let linked_returns =
            self.transactions.list_linked_returns(&transaction.id).await.map_err(|error| {
                CommissionError::NetAmountUnavailable {
                    transaction_id: transaction.id.clone(),
                    reason: error.to_string(),
                }
            })?;
        let net_sales = calculate_net_sales_amount(transaction, &linked_returns);

        let context =
            CalculationContext::new(transaction, net_sales, &plan, &rules, &self.currency);
        let outcome = match self.calculator.calculate(&context) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(
                    event_name = "commission.calculation_failed",
                    correlation_id,
                    transaction_id = %transaction.id,
                    plan_id = %plan.id,
                    error_kind = error.kind(),
                    "calculation failed, transaction stays pending: {error}"
                );
                self.audit.emit(
                    AuditEvent::new(
                        correlation_id,
                        "commission.calculation_failed",
                        AuditCategory::Calculation,
                        ACTOR,
                        AuditOutcome::Rejected,
                    )
                    .for_transaction(&transaction.id)
                    .for_plan(&plan.id)
                    .with_metadata("error_kind", error.kind()),
                );
                return Err(error.into());
            }
        };

        for warning in &outcome.warnings {
            let TraceWarning::AmbiguousPriority { priority, tied_rule_ids, chosen_rule_id } =
                warning;
            tracing::warn!(
                event_name = "commission.ambiguous_priority",
                correlation_id,
                transaction_id = %transaction.id,
                plan_id = %plan.id,
                priority = priority.0,
                tied_rules = tied_rule_ids.len(),
                chosen_rule_id = %chosen_rule_id,
                "rules share a priority; most recent rule chosen"
            );
        }

        Ok((plan, outcome))
    }

    /// A project-specific plan wins over an organization-wide one.
    async fn select_plan(
        &self,
        transaction: &SalesTransaction,
    ) -> Result<CommissionPlan, ServiceError> {
        let plans = self.plans.list_active_plans(&transaction.organization_id).await?;

        let project_plan = transaction.project_id.as_ref().and_then(|project_id| {
            plans.iter().find(|plan| plan.project_id.as_ref() == Some(project_id))
        });
        let selected =
            project_plan.or_else(|| plans.iter().find(|plan| plan.project_id.is_none()));

        selected.cloned().ok_or_else(|| ServiceError::NoActivePlan {
            transaction_id: transaction.id.clone(),
            organization_id: transaction.organization_id.clone(),
        })
    }
}
