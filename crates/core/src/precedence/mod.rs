//! Rule precedence: scope-derived priorities, rule validation, and conflict detection.
//!
//! Priorities are `populated_dimensions * DIMENSION_STRIDE + weight_sum`, where the
//! per-dimension weights follow the tie-break order project > client > territory >
//! product category. Every weight sum stays below the stride, so a rule with more
//! populated dimensions always outranks one with fewer.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::plan::{CommissionPlan, PlanId};
use crate::domain::rule::{CommissionRule, Priority, RuleId, RuleKind, RuleScope, RuleType};
use crate::errors::CommissionError;

pub const DIMENSION_STRIDE: u32 = 16;

pub fn assign_priority_from_scope(scope: &RuleScope) -> Priority {
    let (count, weight_sum) = scope
        .populated_dimensions()
        .fold((0_u32, 0_u32), |(count, sum), dimension| (count + 1, sum + dimension.weight()));
    Priority(count * DIMENSION_STRIDE + weight_sum)
}

/// Orders rules from winning to losing: priority, then most recently created, then id.
pub fn compare_precedence(left: &CommissionRule, right: &CommissionRule) -> Ordering {
    right
        .priority
        .cmp(&left.priority)
        .then_with(|| right.created_at.cmp(&left.created_at))
        .then_with(|| right.id.cmp(&left.id))
}

/// Checks the type-specific bounds of a rule's declared values.
pub fn validate_rule_values(rule: &CommissionRule) -> Result<(), CommissionError> {
    let invalid = |field: &str, reason: String| CommissionError::InvalidRuleConfiguration {
        rule_id: rule.id.clone(),
        field: field.to_string(),
        reason,
    };

    match &rule.kind {
        RuleKind::Percentage { percentage } => {
            check_percentage(*percentage).map_err(|reason| invalid("percentage", reason))?;
        }
        RuleKind::FlatAmount { amount } => {
            if *amount < Decimal::ZERO {
                return Err(invalid("flat_amount", format!("must be >= 0 (got {amount})")));
            }
        }
        RuleKind::Tiered { threshold, tier_percentage, base_percentage } => {
            if *threshold < Decimal::ZERO {
                return Err(invalid("threshold", format!("must be >= 0 (got {threshold})")));
            }
            check_percentage(*tier_percentage)
                .map_err(|reason| invalid("tier_percentage", reason))?;
            if let Some(base) = base_percentage {
                check_percentage(*base)
                    .map_err(|reason| invalid("base_percentage", reason))?;
            }
        }
    }

    if let Some(min) = rule.min_amount {
        if min < Decimal::ZERO {
            return Err(invalid("min_amount", format!("must be >= 0 (got {min})")));
        }
    }
    if let Some(max) = rule.max_amount {
        if max < Decimal::ZERO {
            return Err(invalid("max_amount", format!("must be >= 0 (got {max})")));
        }
    }
    if let (Some(min), Some(max)) = (rule.min_amount, rule.max_amount) {
        if max <= min {
            return Err(invalid(
                "max_amount",
                format!("must be greater than min_amount (min {min}, max {max})"),
            ));
        }
    }

    Ok(())
}

/// Checks plan-level values that feed the calculator.
pub fn validate_plan_values(plan: &CommissionPlan) -> Result<(), CommissionError> {
    if let Some(base_rate) = plan.base_rate {
        check_percentage(base_rate).map_err(|reason| CommissionError::InvalidPlanConfiguration {
            plan_id: plan.id.clone(),
            field: "base_rate".to_string(),
            reason,
        })?;
    }
    Ok(())
}

fn check_percentage(value: Decimal) -> Result<(), String> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(format!("must be within 0..=100 (got {value})"));
    }
    Ok(())
}

/// Pre-persistence validation for a new or edited rule.
///
/// `existing_rules_in_plan` may contain the candidate itself (update flow); it is
/// skipped by id when looking for conflicts.
pub fn validate_scoped_rule(
    candidate: &CommissionRule,
    existing_rules_in_plan: &[CommissionRule],
) -> Result<(), CommissionError> {
    validate_rule_values(candidate)?;

    if !candidate.is_active {
        return Ok(());
    }

    let signature = candidate.scope.signature();
    let rule_type = candidate.rule_type();
    let conflict = existing_rules_in_plan.iter().find(|existing| {
        existing.id != candidate.id
            && existing.is_active
            && existing.rule_type() == rule_type
            && existing.scope == candidate.scope
    });

    if let Some(existing) = conflict {
        return Err(CommissionError::ConflictingRule {
            rule_id: candidate.id.clone(),
            existing_rule_id: existing.id.clone(),
            rule_type,
            signature,
        });
    }

    Ok(())
}

/// A group of active rules that share a scope signature and type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConflict {
    pub signature: String,
    pub scope: RuleScope,
    pub rule_type: RuleType,
    pub priority: Priority,
    pub rule_ids: Vec<RuleId>,
}

pub fn detect_rule_conflicts(rules: &[CommissionRule]) -> Vec<RuleConflict> {
    let mut groups: BTreeMap<(String, RuleType), Vec<&CommissionRule>> = BTreeMap::new();
    for rule in rules.iter().filter(|rule| rule.is_active) {
        groups.entry((rule.scope.signature(), rule.rule_type())).or_default().push(rule);
    }

    let mut conflicts: Vec<RuleConflict> = groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|((signature, rule_type), members)| {
            let mut rule_ids: Vec<RuleId> = members.iter().map(|rule| rule.id.clone()).collect();
            rule_ids.sort();
            RuleConflict {
                signature,
                scope: members[0].scope.clone(),
                rule_type,
                priority: assign_priority_from_scope(&members[0].scope),
                rule_ids,
            }
        })
        .collect();

    conflicts.sort_by(|left, right| {
        right
            .priority
            .cmp(&left.priority)
            .then_with(|| left.signature.cmp(&right.signature))
            .then_with(|| left.rule_type.cmp(&right.rule_type))
    });
    conflicts
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleIssue {
    pub rule_id: RuleId,
    pub kind: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanIssue {
    pub kind: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalePriority {
    pub rule_id: RuleId,
    pub stored: Priority,
    pub derived: Priority,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanHealthReport {
    pub plan_id: PlanId,
    pub healthy: bool,
    pub active_rule_count: usize,
    pub has_default_rule: bool,
    pub plan_issues: Vec<PlanIssue>,
    pub conflicts: Vec<RuleConflict>,
    pub invalid_rules: Vec<RuleIssue>,
    pub stale_priorities: Vec<StalePriority>,
    pub warnings: Vec<String>,
}

/// Standalone health check surfaced to administrators.
///
/// Invalid plan values, conflicts, invalid rules, and stale priorities make a plan
/// unhealthy. A missing
/// organization-wide default is only a warning, since a plan may intentionally
/// leave some transactions uncovered.
pub fn check_plan_health(plan: &CommissionPlan, rules: &[CommissionRule]) -> PlanHealthReport {
    let plan_rules: Vec<CommissionRule> =
        rules.iter().filter(|rule| rule.plan_id == plan.id).cloned().collect();

    let plan_issues: Vec<PlanIssue> = validate_plan_values(plan)
        .err()
        .map(|error| PlanIssue { kind: error.kind().to_string(), message: error.to_string() })
        .into_iter()
        .collect();

    let invalid_rules: Vec<RuleIssue> = plan_rules
        .iter()
        .filter_map(|rule| {
            validate_rule_values(rule).err().map(|error| RuleIssue {
                rule_id: rule.id.clone(),
                kind: error.kind().to_string(),
                message: error.to_string(),
            })
        })
        .collect();

    let stale_priorities: Vec<StalePriority> = plan_rules
        .iter()
        .filter_map(|rule| {
            let derived = rule.derived_priority();
            (derived != rule.priority).then(|| StalePriority {
                rule_id: rule.id.clone(),
                stored: rule.priority,
                derived,
            })
        })
        .collect();

    let conflicts = detect_rule_conflicts(&plan_rules);
    let active_rule_count = plan_rules.iter().filter(|rule| rule.is_active).count();
    let has_default_rule =
        plan_rules.iter().any(|rule| rule.is_active && rule.scope.is_organization_wide());

    let mut warnings = Vec::new();
    if !plan.is_active {
        warnings.push(format!("plan `{}` is inactive", plan.id));
    }
    if active_rule_count == 0 {
        warnings.push("plan has no active rules".to_string());
    } else if !has_default_rule {
        warnings.push(
            "plan has no organization-wide default rule; unmatched transactions stay pending"
                .to_string(),
        );
    }

    PlanHealthReport {
        plan_id: plan.id.clone(),
        healthy: plan_issues.is_empty()
            && conflicts.is_empty()
            && invalid_rules.is_empty()
            && stale_priorities.is_empty(),
        active_rule_count,
        has_default_rule,
        plan_issues,
        conflicts,
        invalid_rules,
        stale_priorities,
        warnings,
    }
}
