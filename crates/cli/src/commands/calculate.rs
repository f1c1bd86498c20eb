use std::path::Path;

use commissions_core::calculator::net_sales::{resolve_net_sales, InMemoryNetSalesSource};
use commissions_core::calculator::{
    CalculationContext, CommissionCalculator, CommissionOutcome, DeterministicCommissionCalculator,
};
use commissions_core::config::LoadOptions;
use commissions_core::domain::plan::{CalculationBasis, CommissionPlan};
use commissions_core::domain::rule::CommissionRule;
use commissions_core::domain::transaction::SalesTransaction;
use commissions_core::errors::{ApplicationError, CommissionError};
use commissions_core::explanation::explain;
use commissions_core::precedence::{validate_plan_values, validate_rule_values};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::commands::{correlation_id, load_config, read_document, CommandResult, EXIT_INPUT};

const COMMAND: &str = "calculate";

#[derive(Debug, Deserialize)]
struct CalculationInput {
    transaction: SalesTransaction,
    /// Kept raw so a missing `basis` can fall back to the configured default.
    plan: Value,
    #[serde(default)]
    rules: Vec<CommissionRule>,
    #[serde(default)]
    linked_returns: Vec<SalesTransaction>,
}

#[derive(Debug, Serialize)]
struct CalculationReport {
    outcome: CommissionOutcome,
    explanation: Vec<String>,
}

pub fn run(input: &Path, options: LoadOptions) -> CommandResult {
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let document: CalculationInput = match read_document(COMMAND, input) {
        Ok(document) => document,
        Err(result) => return result,
    };
    let plan = match plan_with_default_basis(document.plan, config.calculation.default_basis) {
        Ok(plan) => plan,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "input_validation",
                format!("invalid plan: {error}"),
                EXIT_INPUT,
            );
        }
    };

    let correlation_id = correlation_id(COMMAND);
    let transaction = document.transaction;
    let checked = transaction.validate_for_calculation().and_then(|()| {
        validate_plan_values(&plan)?;
        document
            .rules
            .iter()
            .filter(|rule| rule.is_active && rule.plan_id == plan.id)
            .try_for_each(validate_rule_values)
    });
    if let Err(error) = checked {
        return commission_failure(error, &correlation_id);
    }

    let source = InMemoryNetSalesSource::from_transactions(document.linked_returns);
    let net_sales = match resolve_net_sales(&source, &transaction) {
        Ok(net_sales) => net_sales,
        Err(error) => return commission_failure(error, &correlation_id),
    };

    let currency = config.calculation.currency();
    let context =
        CalculationContext::new(&transaction, net_sales, &plan, &document.rules, &currency);
    let outcome = match DeterministicCommissionCalculator.calculate(&context) {
        Ok(outcome) => outcome,
        Err(error) => return commission_failure(error, &correlation_id),
    };

    tracing::info!(
        correlation_id = %correlation_id,
        transaction_id = %transaction.id,
        plan_id = %plan.id,
        rule_id = %outcome.metadata.calculation.rule_id,
        amount = %outcome.amount,
        warnings = outcome.warnings.len(),
        "calculated commission"
    );

    let message = format!("commission {} {}", outcome.amount, currency.code);
    let explanation = explain(&outcome.metadata);
    CommandResult::success_with_data(COMMAND, message, &CalculationReport { outcome, explanation })
}

fn plan_with_default_basis(
    mut plan: Value,
    default_basis: CalculationBasis,
) -> Result<CommissionPlan, serde_json::Error> {
    if let Value::Object(fields) = &mut plan {
        if matches!(fields.get("basis"), None | Some(Value::Null)) {
            fields.insert("basis".to_string(), Value::String(default_basis.as_str().to_string()));
        }
    }
    serde_json::from_value(plan)
}

fn commission_failure(error: CommissionError, correlation_id: &str) -> CommandResult {
    CommandResult::rejected(COMMAND, error.kind(), ApplicationError::from(error), correlation_id)
}

#[cfg(test)]
mod tests {
    use commissions_core::domain::plan::CalculationBasis;
    use serde_json::json;

    use super::plan_with_default_basis;

    #[test]
    fn missing_basis_falls_back_to_configured_default() {
        let plan = plan_with_default_basis(
            json!({"id": "P-1", "organization_id": "org-1", "name": "FY26"}),
            CalculationBasis::Gross,
        )
        .expect("plan parses");
        assert_eq!(plan.basis, CalculationBasis::Gross);

        let explicit = plan_with_default_basis(
            json!({"id": "P-1", "organization_id": "org-1", "name": "FY26", "basis": "net"}),
            CalculationBasis::Gross,
        )
        .expect("plan parses");
        assert_eq!(explicit.basis, CalculationBasis::Net);
    }
}
