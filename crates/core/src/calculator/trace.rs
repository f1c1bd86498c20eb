//! Versioned rule-trace schema stored with every calculation.
//!
//! The trace is the sole audit record of a calculation, so every entry carries the
//! values it used rather than references to rules that may have changed since.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::plan::{CalculationBasis, PlanId};
use crate::domain::rule::{CommissionRule, Priority, RuleId, RuleScope, RuleType, ScopeDimension};
use crate::domain::transaction::{OrganizationId, TransactionId};

pub const TRACE_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTrace {
    pub schema_version: u32,
    pub entries: Vec<TraceEntry>,
}

impl RuleTrace {
    pub fn new() -> Self {
        Self { schema_version: TRACE_SCHEMA_VERSION, entries: Vec::new() }
    }

    pub fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    pub fn selected_rule_id(&self) -> Option<&RuleId> {
        self.entries.iter().find_map(|entry| match entry {
            TraceEntry::RuleSelected { rule_id, .. } => Some(rule_id),
            _ => None,
        })
    }
}

impl Default for RuleTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEntry {
    RuleEvaluated {
        rule_id: RuleId,
        rule_type: RuleType,
        priority: Priority,
        decision: RuleDecision,
    },
    RuleSelected {
        rule_id: RuleId,
        priority: Priority,
        matching_rules: usize,
    },
    AmbiguousPriority {
        priority: Priority,
        tied_rule_ids: Vec<RuleId>,
        chosen_rule_id: RuleId,
    },
    NetSales {
        gross_amount: Decimal,
        returns_total: Decimal,
        net_amount: Decimal,
        basis: CalculationBasis,
        basis_amount: Decimal,
    },
    FormulaApplied {
        formula: AppliedFormula,
        amount: Decimal,
    },
    Clamped {
        pre_clamp_amount: Decimal,
        min_amount: Option<Decimal>,
        max_amount: Option<Decimal>,
        post_clamp_amount: Decimal,
        applied: bool,
    },
    Rounded {
        pre_rounding_amount: Decimal,
        minor_units: u32,
        strategy: RoundingMode,
        amount: Decimal,
    },
    Final {
        amount: Decimal,
        currency: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RuleDecision {
    Matched,
    Inactive,
    OtherPlan { plan_id: PlanId },
    ScopeMismatch { dimension: ScopeDimension, required: String, actual: Option<String> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    HalfUp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseRateSource {
    Rule,
    Plan,
    None,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppliedFormula {
    Percentage {
        basis_amount: Decimal,
        percentage: Decimal,
    },
    FlatAmount {
        amount: Decimal,
    },
    Tiered {
        basis_amount: Decimal,
        threshold: Decimal,
        base_percentage: Decimal,
        base_source: BaseRateSource,
        tier_percentage: Decimal,
        lower_band_amount: Decimal,
        upper_band_amount: Decimal,
        lower_band_commission: Decimal,
        upper_band_commission: Decimal,
    },
}

/// Non-fatal integrity findings raised while calculating.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceWarning {
    AmbiguousPriority { priority: Priority, tied_rule_ids: Vec<RuleId>, chosen_rule_id: RuleId },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationSummary {
    pub rule_id: RuleId,
    pub rule_type: RuleType,
    pub priority: Priority,
    pub basis: CalculationBasis,
    pub basis_amount: Decimal,
    pub pre_clamp_amount: Decimal,
    pub post_clamp_amount: Decimal,
    pub amount: Decimal,
    pub currency: String,
    pub minor_units: u32,
}

/// Everything the calculator read, captured at calculation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub transaction_id: TransactionId,
    pub organization_id: OrganizationId,
    pub transaction_date: NaiveDate,
    pub gross_amount: Decimal,
    pub returns_total: Decimal,
    pub net_amount: Decimal,
    pub scope: RuleScope,
    pub client_tier: Option<String>,
    pub plan_id: PlanId,
    pub plan_base_rate: Option<Decimal>,
    pub plan_basis: CalculationBasis,
    pub rules: Vec<CommissionRule>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationMetadata {
    pub rule_trace: RuleTrace,
    pub calculation: CalculationSummary,
    pub input_snapshot: InputSnapshot,
    /// `sha256:<hex>` over the canonical JSON of `input_snapshot`.
    pub input_checksum: String,
}
