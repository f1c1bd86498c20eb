use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::transaction::{SalesTransaction, TransactionId, TransactionKind};
use crate::errors::CommissionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetSales {
    pub gross_amount: Decimal,
    /// Absolute value of the summed linked returns and adjustments.
    pub returns_total: Decimal,
    pub net_amount: Decimal,
}

impl NetSales {
    pub fn gross_only(gross_amount: Decimal) -> Self {
        Self { gross_amount, returns_total: Decimal::ZERO, net_amount: gross_amount }
    }
}

/// Reduces the gross amount by the absolute sum of linked returns, floored at zero.
///
/// Returns whose sum exceeds the decimal range saturate at `Decimal::MAX`.
///
/// Only non-sale transactions whose parent is `transaction` count; anything else in
/// `linked_returns` is ignored.
pub fn calculate_net_sales_amount(
    transaction: &SalesTransaction,
    linked_returns: &[SalesTransaction],
) -> NetSales {
    let returns_total = linked_returns
        .iter()
        .filter(|linked| linked.kind != TransactionKind::Sale)
        .filter(|linked| linked.parent_transaction_id.as_ref() == Some(&transaction.id))
        .try_fold(Decimal::ZERO, |total, linked| total.checked_add(linked.amount))
        .map(|total| total.abs())
        .unwrap_or(Decimal::MAX);

    // An overflowing difference can only be below zero, which floors to zero anyway.
    let net_amount =
        transaction.amount.checked_sub(returns_total).unwrap_or(Decimal::ZERO).max(Decimal::ZERO);
    NetSales { gross_amount: transaction.amount, returns_total, net_amount }
}

/// Loads the returns and adjustments linked to a sale.
pub trait NetSalesSource: Send + Sync {
    fn linked_returns(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<SalesTransaction>, String>;
}

pub fn resolve_net_sales(
    source: &dyn NetSalesSource,
    transaction: &SalesTransaction,
) -> Result<NetSales, CommissionError> {
    let linked = source.linked_returns(&transaction.id).map_err(|reason| {
        CommissionError::NetAmountUnavailable { transaction_id: transaction.id.clone(), reason }
    })?;
    Ok(calculate_net_sales_amount(transaction, &linked))
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryNetSalesSource {
    returns_by_parent: HashMap<TransactionId, Vec<SalesTransaction>>,
}

impl InMemoryNetSalesSource {
    pub fn from_transactions(transactions: impl IntoIterator<Item = SalesTransaction>) -> Self {
        let mut returns_by_parent: HashMap<TransactionId, Vec<SalesTransaction>> = HashMap::new();
        for transaction in transactions {
            if let Some(parent) = transaction.parent_transaction_id.clone() {
                returns_by_parent.entry(parent).or_default().push(transaction);
            }
        }
        Self { returns_by_parent }
    }
}

impl NetSalesSource for InMemoryNetSalesSource {
    fn linked_returns(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<SalesTransaction>, String> {
        Ok(self.returns_by_parent.get(transaction_id).cloned().unwrap_or_default())
    }
}
