//! Renders a stored rule trace as human-readable lines.
//!
//! Explanations are assembled only from persisted calculation metadata; rules are
//! never re-evaluated, so an explanation stays faithful even after rules change.

use crate::calculator::trace::{
    AppliedFormula, BaseRateSource, CalculationMetadata, RuleDecision, TraceEntry,
};

pub fn explain(metadata: &CalculationMetadata) -> Vec<String> {
    let mut lines = vec![format!(
        "Calculation for transaction {} under plan {} (trace schema v{}).",
        metadata.input_snapshot.transaction_id,
        metadata.input_snapshot.plan_id,
        metadata.rule_trace.schema_version
    )];

    lines.extend(metadata.rule_trace.entries.iter().map(explain_entry));
    lines
}

fn explain_entry(entry: &TraceEntry) -> String {
    match entry {
        TraceEntry::RuleEvaluated { rule_id, rule_type, priority, decision } => match decision {
            RuleDecision::Matched => {
                format!(
                    "Rule {rule_id} ({rule_type}, priority {priority}) matches the transaction."
                )
            }
            RuleDecision::Inactive => format!("Rule {rule_id} was skipped because it is inactive."),
            RuleDecision::OtherPlan { plan_id } => {
                format!("Rule {rule_id} was skipped because it belongs to plan {plan_id}.")
            }
            RuleDecision::ScopeMismatch { dimension, required, actual } => format!(
                "Rule {rule_id} was skipped: it requires {} `{required}` \
                 but the transaction has {}.",
                dimension.as_str(),
                actual
                    .as_deref()
                    .map(|value| format!("`{value}`"))
                    .unwrap_or_else(|| "none".to_string())
            ),
        },
        TraceEntry::RuleSelected { rule_id, priority, matching_rules } => format!(
            "Selected rule {rule_id} at priority {priority} \
             out of {matching_rules} matching rule(s)."
        ),
        TraceEntry::AmbiguousPriority { priority, tied_rule_ids, chosen_rule_id } => {
            let tied = tied_rule_ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ");
            format!(
                "Warning: rules {tied} share priority {priority}; \
                 {chosen_rule_id} was chosen as the most recent."
            )
        }
        TraceEntry::NetSales { gross_amount, returns_total, net_amount, basis, basis_amount } => {
            format!(
                "Gross {gross_amount} less returns {returns_total} gives net {net_amount}; \
                 the {} basis is {basis_amount}.",
                basis.as_str()
            )
        }
        TraceEntry::FormulaApplied { formula, amount } => match formula {
            AppliedFormula::Percentage { basis_amount, percentage } => {
                format!("{percentage}% of {basis_amount} = {amount}.")
            }
            AppliedFormula::FlatAmount { .. } => format!("Flat amount of {amount}."),
            AppliedFormula::Tiered {
                threshold,
                base_percentage,
                base_source,
                tier_percentage,
                lower_band_amount,
                upper_band_amount,
                lower_band_commission,
                upper_band_commission,
                ..
            } => {
                let source = match base_source {
                    BaseRateSource::Rule => "rule",
                    BaseRateSource::Plan => "plan",
                    BaseRateSource::None => "no base rate",
                };
                format!(
                    "Tiered at {threshold}: {base_percentage}% ({source}) of {lower_band_amount} \
                     = {lower_band_commission}, plus {tier_percentage}% of {upper_band_amount} \
                     = {upper_band_commission}; total {amount}."
                )
            }
        },
        TraceEntry::Clamped {
            pre_clamp_amount,
            min_amount,
            max_amount,
            post_clamp_amount,
            applied,
        } => {
            if *applied {
                format!(
                    "Clamped {pre_clamp_amount} to {post_clamp_amount} (min {}, max {}).",
                    display_cap(min_amount.as_ref()),
                    display_cap(max_amount.as_ref())
                )
            } else {
                format!("No cap applied to {pre_clamp_amount}.")
            }
        }
        TraceEntry::Rounded { pre_rounding_amount, minor_units, amount, .. } => {
            format!(
                "Rounded {pre_rounding_amount} half-up to {minor_units} decimal place(s): {amount}."
            )
        }
        TraceEntry::Final { amount, currency } => format!("Commission: {amount} {currency}."),
    }
}

fn display_cap(cap: Option<&rust_decimal::Decimal>) -> String {
    cap.map(ToString::to_string).unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::explain;
    use crate::calculator::net_sales::NetSales;
    use crate::calculator::rounding::Currency;
    use crate::calculator::{calculate_commission, CalculationContext};
    use crate::domain::plan::{CommissionPlan, PlanId};
    use crate::domain::rule::{CommissionRule, RuleId, RuleKind, RuleScope};
    use crate::domain::transaction::{OrganizationId, SalesTransaction, TransactionId};

    #[test]
    fn explains_each_step_from_the_stored_trace() {
        let transaction = SalesTransaction::sale(
            TransactionId::new("T-7"),
            OrganizationId::new("org-1"),
            Decimal::new(1000, 0),
            NaiveDate::from_ymd_opt(2026, 6, 1).expect("valid date"),
        );
        let plan = CommissionPlan::new(PlanId::new("P-1"), OrganizationId::new("org-1"), "FY26");
        let created_at =
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid timestamp");
        let rules = [
            CommissionRule::draft(
                RuleId::new("R-1"),
                PlanId::new("P-1"),
                RuleKind::Percentage { percentage: Decimal::new(20, 0) },
                RuleScope::default(),
                created_at,
            )
            .with_caps(None, Some(Decimal::new(150, 0))),
            CommissionRule::draft(
                RuleId::new("R-2"),
                PlanId::new("P-1"),
                RuleKind::Percentage { percentage: Decimal::new(30, 0) },
                RuleScope::default().with_territory("APAC"),
                created_at,
            ),
        ];
        let currency = Currency::usd();
        let outcome = calculate_commission(&CalculationContext::new(
            &transaction,
            NetSales::gross_only(transaction.amount),
            &plan,
            &rules,
            &currency,
        ))
        .expect("calculation should succeed");

        let lines = explain(&outcome.metadata);

        assert!(lines[0].contains("T-7"));
        assert!(lines.iter().any(|line| line.contains("requires territory `APAC`")));
        assert!(lines.iter().any(|line| line.contains("Clamped 200 to 150")));
        assert_eq!(lines.last().map(String::as_str), Some("Commission: 150.00 USD."));
    }
}
