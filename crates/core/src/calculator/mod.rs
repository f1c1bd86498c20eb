pub mod net_sales;
pub mod rounding;
pub mod trace;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::calculation::CalculationStatus;
use crate::domain::plan::{CalculationBasis, CommissionPlan};
use crate::domain::rule::{CommissionRule, RuleKind, RuleScope};
use crate::domain::transaction::SalesTransaction;
use crate::errors::CommissionError;
use crate::precedence::{assign_priority_from_scope, compare_precedence, validate_plan_values};

use self::net_sales::NetSales;
use self::rounding::Currency;
use self::trace::{
    AppliedFormula, BaseRateSource, CalculationMetadata, CalculationSummary, InputSnapshot,
    RoundingMode, RuleDecision, RuleTrace, TraceEntry, TraceWarning,
};

/// Explicit inputs for one calculation. Nothing is read from ambient state.
#[derive(Clone, Debug)]
pub struct CalculationContext<'a> {
    pub transaction: &'a SalesTransaction,
    pub net_sales: NetSales,
    pub plan: &'a CommissionPlan,
    pub rules: &'a [CommissionRule],
    pub currency: &'a Currency,
}

impl<'a> CalculationContext<'a> {
    pub fn new(
        transaction: &'a SalesTransaction,
        net_sales: NetSales,
        plan: &'a CommissionPlan,
        rules: &'a [CommissionRule],
        currency: &'a Currency,
    ) -> Self {
        Self { transaction, net_sales, plan, rules, currency }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionOutcome {
    pub amount: Decimal,
    pub status: CalculationStatus,
    pub metadata: CalculationMetadata,
    pub warnings: Vec<TraceWarning>,
}

pub trait CommissionCalculator: Send + Sync {
    fn calculate(
        &self,
        context: &CalculationContext<'_>,
    ) -> Result<CommissionOutcome, CommissionError>;
}

#[derive(Default)]
pub struct DeterministicCommissionCalculator;

impl CommissionCalculator for DeterministicCommissionCalculator {
    fn calculate(
        &self,
        context: &CalculationContext<'_>,
    ) -> Result<CommissionOutcome, CommissionError> {
        calculate_commission_with_precedence(context, context.rules)
    }
}

/// Ranks `all_scoped_rules` from their scopes, then calculates.
///
/// Stored priorities are ignored so a rule whose priority drifted from its scope
/// cannot change the outcome.
pub fn calculate_commission_with_precedence(
    context: &CalculationContext<'_>,
    all_scoped_rules: &[CommissionRule],
) -> Result<CommissionOutcome, CommissionError> {
    let ranked: Vec<CommissionRule> = all_scoped_rules
        .iter()
        .cloned()
        .map(|mut rule| {
            rule.priority = assign_priority_from_scope(&rule.scope);
            rule
        })
        .collect();

    calculate_commission(&CalculationContext::new(
        context.transaction,
        context.net_sales,
        context.plan,
        &ranked,
        context.currency,
    ))
}

pub fn calculate_commission(
    context: &CalculationContext<'_>,
) -> Result<CommissionOutcome, CommissionError> {
    validate_plan_values(context.plan)?;

    let transaction_scope = context.transaction.scope();
    let mut trace = RuleTrace::new();
    let mut matching: Vec<&CommissionRule> = Vec::new();

    for rule in context.rules {
        let decision = evaluate_rule(rule, context.plan, &transaction_scope);
        if decision == RuleDecision::Matched {
            matching.push(rule);
        }
        trace.push(TraceEntry::RuleEvaluated {
            rule_id: rule.id.clone(),
            rule_type: rule.rule_type(),
            priority: rule.priority,
            decision,
        });
    }

    matching.sort_by(|left, right| compare_precedence(left, right));
    let Some(selected) = matching.first().copied() else {
        return Err(CommissionError::NoMatchingRule {
            transaction_id: context.transaction.id.clone(),
            plan_id: context.plan.id.clone(),
        });
    };

    trace.push(TraceEntry::RuleSelected {
        rule_id: selected.id.clone(),
        priority: selected.priority,
        matching_rules: matching.len(),
    });

    let mut warnings = Vec::new();
    let tied: Vec<_> = matching
        .iter()
        .filter(|rule| rule.priority == selected.priority)
        .map(|rule| rule.id.clone())
        .collect();
    if tied.len() > 1 {
        trace.push(TraceEntry::AmbiguousPriority {
            priority: selected.priority,
            tied_rule_ids: tied.clone(),
            chosen_rule_id: selected.id.clone(),
        });
        warnings.push(TraceWarning::AmbiguousPriority {
            priority: selected.priority,
            tied_rule_ids: tied,
            chosen_rule_id: selected.id.clone(),
        });
    }

    let basis = selected.basis.unwrap_or(context.plan.basis);
    let basis_amount = match basis {
        CalculationBasis::Net => context.net_sales.net_amount,
        CalculationBasis::Gross => context.net_sales.gross_amount,
    };
    trace.push(TraceEntry::NetSales {
        gross_amount: context.net_sales.gross_amount,
        returns_total: context.net_sales.returns_total,
        net_amount: context.net_sales.net_amount,
        basis,
        basis_amount,
    });

    let (formula, pre_clamp_amount) = apply_formula(&selected.kind, basis_amount, context.plan)
        .ok_or_else(|| CommissionError::AmountOutOfRange {
            transaction_id: context.transaction.id.clone(),
            step: format!("{} formula", selected.rule_type()),
        })?;
    trace.push(TraceEntry::FormulaApplied { formula, amount: pre_clamp_amount });

    let post_clamp_amount = clamp(pre_clamp_amount, selected.min_amount, selected.max_amount);
    trace.push(TraceEntry::Clamped {
        pre_clamp_amount,
        min_amount: selected.min_amount,
        max_amount: selected.max_amount,
        post_clamp_amount,
        applied: post_clamp_amount != pre_clamp_amount,
    });

    let amount = context.currency.round(post_clamp_amount);
    trace.push(TraceEntry::Rounded {
        pre_rounding_amount: post_clamp_amount,
        minor_units: context.currency.minor_units,
        strategy: RoundingMode::HalfUp,
        amount,
    });
    trace.push(TraceEntry::Final { amount, currency: context.currency.code.clone() });

    let input_snapshot = InputSnapshot {
        transaction_id: context.transaction.id.clone(),
        organization_id: context.transaction.organization_id.clone(),
        transaction_date: context.transaction.transaction_date,
        gross_amount: context.net_sales.gross_amount,
        returns_total: context.net_sales.returns_total,
        net_amount: context.net_sales.net_amount,
        scope: transaction_scope,
        client_tier: context.transaction.client_tier.clone(),
        plan_id: context.plan.id.clone(),
        plan_base_rate: context.plan.base_rate,
        plan_basis: context.plan.basis,
        rules: context.rules.to_vec(),
    };
    let input_checksum = checksum_for_input(&input_snapshot);

    Ok(CommissionOutcome {
        amount,
        status: CalculationStatus::Calculated,
        metadata: CalculationMetadata {
            rule_trace: trace,
            calculation: CalculationSummary {
                rule_id: selected.id.clone(),
                rule_type: selected.rule_type(),
                priority: selected.priority,
                basis,
                basis_amount,
                pre_clamp_amount,
                post_clamp_amount,
                amount,
                currency: context.currency.code.clone(),
                minor_units: context.currency.minor_units,
            },
            input_snapshot,
            input_checksum,
        },
        warnings,
    })
}

fn evaluate_rule(
    rule: &CommissionRule,
    plan: &CommissionPlan,
    transaction_scope: &RuleScope,
) -> RuleDecision {
    if rule.plan_id != plan.id {
        return RuleDecision::OtherPlan { plan_id: rule.plan_id.clone() };
    }
    if !rule.is_active {
        return RuleDecision::Inactive;
    }

    for dimension in rule.scope.populated_dimensions() {
        let required = rule.scope.value(dimension).unwrap_or_default();
        let actual = transaction_scope.value(dimension);
        if actual != Some(required) {
            return RuleDecision::ScopeMismatch {
                dimension,
                required: required.to_string(),
                actual: actual.map(str::to_string),
            };
        }
    }

    RuleDecision::Matched
}

fn percent_of(amount: Decimal, percentage: Decimal) -> Option<Decimal> {
    amount.checked_mul(percentage)?.checked_div(Decimal::ONE_HUNDRED)
}

fn apply_formula(
    kind: &RuleKind,
    basis_amount: Decimal,
    plan: &CommissionPlan,
) -> Option<(AppliedFormula, Decimal)> {
    match kind {
        RuleKind::Percentage { percentage } => Some((
            AppliedFormula::Percentage { basis_amount, percentage: *percentage },
            percent_of(basis_amount, *percentage)?,
        )),
        RuleKind::FlatAmount { amount } => {
            Some((AppliedFormula::FlatAmount { amount: *amount }, *amount))
        }
        RuleKind::Tiered { threshold, tier_percentage, base_percentage } => {
            let (base_percentage, base_source) = match (base_percentage, plan.base_rate) {
                (Some(rate), _) => (*rate, BaseRateSource::Rule),
                (None, Some(rate)) => (rate, BaseRateSource::Plan),
                (None, None) => (Decimal::ZERO, BaseRateSource::None),
            };
            let lower_band_amount = basis_amount.min(*threshold).max(Decimal::ZERO);
            let upper_band_amount = basis_amount.checked_sub(*threshold)?.max(Decimal::ZERO);
            let lower_band_commission = percent_of(lower_band_amount, base_percentage)?;
            let upper_band_commission = percent_of(upper_band_amount, *tier_percentage)?;
            let amount = lower_band_commission.checked_add(upper_band_commission)?;

            Some((
                AppliedFormula::Tiered {
                    basis_amount,
                    threshold: *threshold,
                    base_percentage,
                    base_source,
                    tier_percentage: *tier_percentage,
                    lower_band_amount,
                    upper_band_amount,
                    lower_band_commission,
                    upper_band_commission,
                },
                amount,
            ))
        }
    }
}

fn clamp(amount: Decimal, min_amount: Option<Decimal>, max_amount: Option<Decimal>) -> Decimal {
    let mut clamped = amount;
    if let Some(min) = min_amount {
        clamped = clamped.max(min);
    }
    if let Some(max) = max_amount {
        clamped = clamped.min(max);
    }
    clamped
}

fn checksum_for_input(input: &InputSnapshot) -> String {
    let canonical =
        serde_json::to_string(input).unwrap_or_else(|error| format!("serialization_error:{error}"));
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}
