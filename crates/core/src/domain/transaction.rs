use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::rule::{ClientId, ProductCategoryId, ProjectId, RuleScope, TerritoryId};
use crate::domain::string_id;
use crate::errors::CommissionError;

string_id!(TransactionId);
string_id!(OrganizationId);
string_id!(SalespersonId);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    #[default]
    Sale,
    Return,
    Adjustment,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sale => "SALE",
            Self::Return => "RETURN",
            Self::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SALE" => Some(Self::Sale),
            "RETURN" => Some(Self::Return),
            "ADJUSTMENT" => Some(Self::Adjustment),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesTransaction {
    pub id: TransactionId,
    pub organization_id: OrganizationId,
    pub amount: Decimal,
    pub transaction_date: NaiveDate,
    #[serde(default)]
    pub kind: TransactionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_category_id: Option<ProductCategoryId>,
    /// Resolved by the caller from the transaction's client or project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub territory_id: Option<TerritoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salesperson_id: Option<SalespersonId>,
    /// Set on returns and adjustments that reduce a sale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_transaction_id: Option<TransactionId>,
}

impl SalesTransaction {
    pub fn sale(
        id: TransactionId,
        organization_id: OrganizationId,
        amount: Decimal,
        transaction_date: NaiveDate,
    ) -> Self {
        Self {
            id,
            organization_id,
            amount,
            transaction_date,
            kind: TransactionKind::Sale,
            project_id: None,
            client_id: None,
            client_tier: None,
            product_category_id: None,
            territory_id: None,
            salesperson_id: None,
            parent_transaction_id: None,
        }
    }

    /// A return linked to `parent`. `amount` is usually negative.
    pub fn linked_return(
        id: TransactionId,
        parent: &SalesTransaction,
        amount: Decimal,
        transaction_date: NaiveDate,
    ) -> Self {
        Self {
            kind: TransactionKind::Return,
            parent_transaction_id: Some(parent.id.clone()),
            ..Self::sale(id, parent.organization_id.clone(), amount, transaction_date)
        }
    }

    /// The concrete scope values a rule scope is matched against.
    pub fn scope(&self) -> RuleScope {
        RuleScope {
            territory_id: self.territory_id.clone(),
            client_id: self.client_id.clone(),
            project_id: self.project_id.clone(),
            product_category_id: self.product_category_id.clone(),
        }
    }

    pub fn validate_for_calculation(&self) -> Result<(), CommissionError> {
        if self.kind != TransactionKind::Sale {
            return Err(CommissionError::InvalidTransaction {
                transaction_id: self.id.clone(),
                reason: format!("{} transactions are not commissionable", self.kind.as_str()),
            });
        }

        if self.amount <= Decimal::ZERO {
            return Err(CommissionError::InvalidTransaction {
                transaction_id: self.id.clone(),
                reason: format!("amount must be greater than zero (got {})", self.amount),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::{OrganizationId, SalesTransaction, TransactionId, TransactionKind};
    use crate::errors::CommissionError;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid date")
    }

    #[test]
    fn non_positive_amounts_are_rejected_before_calculation() {
        let sale = SalesTransaction::sale(
            TransactionId::new("T-1"),
            OrganizationId::new("org-1"),
            Decimal::ZERO,
            date(),
        );

        let error = sale.validate_for_calculation().expect_err("zero amount should fail");
        assert!(matches!(error, CommissionError::InvalidTransaction { .. }));
    }

    #[test]
    fn returns_are_not_commissionable_on_their_own() {
        let sale = SalesTransaction::sale(
            TransactionId::new("T-1"),
            OrganizationId::new("org-1"),
            Decimal::new(1000, 0),
            date(),
        );
        let refund = SalesTransaction::linked_return(
            TransactionId::new("T-1-R"),
            &sale,
            Decimal::new(-200, 0),
            date(),
        );

        assert_eq!(refund.kind, TransactionKind::Return);
        assert_eq!(refund.parent_transaction_id.as_ref(), Some(&sale.id));
        assert!(refund.validate_for_calculation().is_err());
        assert!(sale.validate_for_calculation().is_ok());
    }
}
