pub mod audit;
pub mod batch;
pub mod calculator;
pub mod config;
pub mod domain;
pub mod errors;
pub mod explanation;
pub mod precedence;

pub use batch::{BatchItem, BatchItemOutcome, BatchReport};
pub use calculator::net_sales::{
    calculate_net_sales_amount, resolve_net_sales, InMemoryNetSalesSource, NetSales,
    NetSalesSource,
};
pub use calculator::rounding::{round_half_up, Currency};
pub use calculator::trace::{CalculationMetadata, RuleTrace, TraceEntry, TraceWarning};
pub use calculator::{
    calculate_commission, calculate_commission_with_precedence, CalculationContext,
    CommissionCalculator, CommissionOutcome, DeterministicCommissionCalculator,
};
pub use domain::calculation::{CalculationId, CalculationStatus, CommissionCalculation};
pub use domain::plan::{CalculationBasis, CommissionPlan, PlanId};
pub use domain::rule::{CommissionRule, Priority, RuleId, RuleKind, RuleScope, RuleType};
pub use domain::transaction::{SalesTransaction, TransactionId, TransactionKind};
pub use errors::{ApplicationError, CommissionError, DomainError, InterfaceError};
pub use explanation::explain;
pub use precedence::{
    assign_priority_from_scope, check_plan_health, detect_rule_conflicts, validate_scoped_rule,
    PlanHealthReport, RuleConflict,
};
