use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::calculator::trace::CalculationMetadata;
use crate::calculator::CommissionOutcome;
use crate::domain::plan::PlanId;
use crate::domain::string_id;
use crate::domain::transaction::{SalesTransaction, SalespersonId, TransactionId};
use crate::errors::DomainError;

string_id!(CalculationId);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalculationStatus {
    #[default]
    Pending,
    Calculated,
    Approved,
    Paid,
    Rejected,
}

impl CalculationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Calculated => "CALCULATED",
            Self::Approved => "APPROVED",
            Self::Paid => "PAID",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "CALCULATED" => Some(Self::Calculated),
            "APPROVED" => Some(Self::Approved),
            "PAID" => Some(Self::Paid),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Pending and calculated rows may still be recalculated; later states are frozen.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Calculated)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionCalculation {
    pub id: CalculationId,
    pub sales_transaction_id: TransactionId,
    pub salesperson_id: Option<SalespersonId>,
    pub plan_id: PlanId,
    pub status: CalculationStatus,
    pub amount: Decimal,
    pub currency: String,
    pub metadata: Option<CalculationMetadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommissionCalculation {
    pub fn from_outcome(
        id: CalculationId,
        transaction: &SalesTransaction,
        plan_id: PlanId,
        outcome: CommissionOutcome,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sales_transaction_id: transaction.id.clone(),
            salesperson_id: transaction.salesperson_id.clone(),
            plan_id,
            status: outcome.status,
            amount: outcome.amount,
            currency: outcome.metadata.calculation.currency.clone(),
            metadata: Some(outcome.metadata),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the amount and trace with a fresh outcome, keeping the row's identity.
    pub fn apply_recalculation(
        &mut self,
        transaction: &SalesTransaction,
        plan_id: PlanId,
        outcome: CommissionOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.status.is_open() {
            return Err(DomainError::CalculationClosed { status: self.status });
        }

        self.salesperson_id = transaction.salesperson_id.clone();
        self.plan_id = plan_id;
        self.status = outcome.status;
        self.amount = outcome.amount;
        self.currency = outcome.metadata.calculation.currency.clone();
        self.metadata = Some(outcome.metadata);
        self.updated_at = now;
        Ok(())
    }

    pub fn can_transition_to(&self, next: CalculationStatus) -> bool {
        matches!(
            (self.status, next),
            (CalculationStatus::Pending, CalculationStatus::Calculated)
                | (CalculationStatus::Calculated, CalculationStatus::Approved)
                | (CalculationStatus::Approved, CalculationStatus::Paid)
                | (CalculationStatus::Pending, CalculationStatus::Rejected)
                | (CalculationStatus::Calculated, CalculationStatus::Rejected)
        )
    }

    pub fn transition_to(
        &mut self,
        next: CalculationStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            self.updated_at = now;
            return Ok(());
        }

        Err(DomainError::InvalidCalculationTransition { from: self.status, to: next })
    }
}
