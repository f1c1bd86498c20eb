use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::calculation::{CalculationId, CalculationStatus};
use crate::domain::transaction::TransactionId;

/// Result of one transaction in a bulk recalculation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchItemOutcome {
    Calculated { calculation_id: CalculationId, amount: Decimal },
    AlreadyCalculated { calculation_id: CalculationId },
    Recalculated { calculation_id: CalculationId, previous_amount: Decimal, amount: Decimal },
    /// Approved, paid and rejected rows keep their stored amount.
    Skipped { calculation_id: CalculationId, status: CalculationStatus },
    Failed { kind: String, message: String, user_message: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub transaction_id: TransactionId,
    #[serde(flatten)]
    pub outcome: BatchItemOutcome,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub fn record(&mut self, transaction_id: TransactionId, outcome: BatchItemOutcome) {
        self.items.push(BatchItem { transaction_id, outcome });
    }

    pub fn calculated(&self) -> usize {
        self.count(|outcome| matches!(outcome, BatchItemOutcome::Calculated { .. }))
    }

    pub fn already_calculated(&self) -> usize {
        self.count(|outcome| matches!(outcome, BatchItemOutcome::AlreadyCalculated { .. }))
    }

    pub fn recalculated(&self) -> usize {
        self.count(|outcome| matches!(outcome, BatchItemOutcome::Recalculated { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, BatchItemOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, BatchItemOutcome::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    fn count(&self, predicate: impl Fn(&BatchItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|item| predicate(&item.outcome)).count()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{BatchItemOutcome, BatchReport};
    use crate::domain::calculation::{CalculationId, CalculationStatus};
    use crate::domain::transaction::TransactionId;

    #[test]
    fn counts_each_outcome_independently() {
        let mut report = BatchReport::default();
        report.record(
            TransactionId::new("T-1"),
            BatchItemOutcome::Calculated {
                calculation_id: CalculationId::new("C-1"),
                amount: Decimal::new(10_000, 2),
            },
        );
        report.record(
            TransactionId::new("T-2"),
            BatchItemOutcome::Failed {
                kind: "no_matching_rule".to_string(),
                message: "no rule".to_string(),
                user_message: "No commission rule covers this transaction.".to_string(),
            },
        );
        report.record(
            TransactionId::new("T-3"),
            BatchItemOutcome::AlreadyCalculated { calculation_id: CalculationId::new("C-0") },
        );
        report.record(
            TransactionId::new("T-4"),
            BatchItemOutcome::Recalculated {
                calculation_id: CalculationId::new("C-4"),
                previous_amount: Decimal::new(10_000, 2),
                amount: Decimal::new(12_000, 2),
            },
        );
        report.record(
            TransactionId::new("T-5"),
            BatchItemOutcome::Skipped {
                calculation_id: CalculationId::new("C-5"),
                status: CalculationStatus::Paid,
            },
        );

        assert_eq!(report.calculated(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.already_calculated(), 1);
        assert_eq!(report.recalculated(), 1);
        assert_eq!(report.skipped(), 1);
        assert!(report.has_failures());

        let json = serde_json::to_value(&report).expect("report serializes");
        assert_eq!(json["items"][1]["outcome"], "failed");
        assert_eq!(json["items"][1]["transaction_id"], "T-2");
        assert_eq!(json["items"][3]["previous_amount"], "100.00");
        assert_eq!(json["items"][4]["outcome"], "skipped");
        assert_eq!(json["items"][4]["status"], "PAID");
    }
}
