use thiserror::Error;

use crate::domain::calculation::CalculationStatus;
use crate::domain::plan::PlanId;
use crate::domain::rule::{RuleId, RuleType};
use crate::domain::transaction::TransactionId;

/// Failures raised by the precedence validator and the calculator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommissionError {
    #[error("invalid rule configuration for `{rule_id}`: {field} {reason}")]
    InvalidRuleConfiguration { rule_id: RuleId, field: String, reason: String },
    #[error("invalid plan configuration for `{plan_id}`: {field} {reason}")]
    InvalidPlanConfiguration { plan_id: PlanId, field: String, reason: String },
    #[error(
        "rule `{rule_id}` conflicts with active rule `{existing_rule_id}`: \
         both are {rule_type} at scope {signature}"
    )]
    ConflictingRule {
        rule_id: RuleId,
        existing_rule_id: RuleId,
        rule_type: RuleType,
        signature: String,
    },
    #[error("no commission rule in plan `{plan_id}` matches transaction `{transaction_id}`")]
    NoMatchingRule { transaction_id: TransactionId, plan_id: PlanId },
    #[error("net sales amount unavailable for transaction `{transaction_id}`: {reason}")]
    NetAmountUnavailable { transaction_id: TransactionId, reason: String },
    #[error("transaction `{transaction_id}` cannot be calculated: {reason}")]
    InvalidTransaction { transaction_id: TransactionId, reason: String },
    #[error("commission for transaction `{transaction_id}` overflows during {step}")]
    AmountOutOfRange { transaction_id: TransactionId, step: String },
}

impl CommissionError {
    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRuleConfiguration { .. } => "invalid_rule_configuration",
            Self::InvalidPlanConfiguration { .. } => "invalid_plan_configuration",
            Self::ConflictingRule { .. } => "conflicting_rule",
            Self::NoMatchingRule { .. } => "no_matching_rule",
            Self::NetAmountUnavailable { .. } => "net_amount_unavailable",
            Self::InvalidTransaction { .. } => "invalid_transaction",
            Self::AmountOutOfRange { .. } => "amount_out_of_range",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid calculation transition from {from:?} to {to:?}")]
    InvalidCalculationTransition { from: CalculationStatus, to: CalculationStatus },
    #[error("calculation is {status:?} and can no longer be recalculated")]
    CalculationClosed { status: CalculationStatus },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Commission(#[from] CommissionError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The commission plan, rule, or transaction is invalid. \
                 Fix the configuration and try again."
            }
            Self::NotFound { .. } => {
                "The referenced record does not exist. Check the identifier and try again."
            }
            Self::Unprocessable { .. } => {
                "No commission rule covers this transaction. \
                 Add a matching rule or an organization-wide default."
            }
            Self::ServiceUnavailable { .. } => {
                "Transaction data could not be loaded. \
                 This is a system data integrity issue; please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Commission(
                error @ (CommissionError::InvalidRuleConfiguration { .. }
                | CommissionError::InvalidPlanConfiguration { .. }
                | CommissionError::ConflictingRule { .. }
                | CommissionError::InvalidTransaction { .. }
                | CommissionError::AmountOutOfRange { .. }),
            ) => Self::BadRequest { message: error.to_string(), correlation_id: unassigned() },
            ApplicationError::Commission(error @ CommissionError::NoMatchingRule { .. }) => {
                Self::Unprocessable { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Commission(error @ CommissionError::NetAmountUnavailable { .. }) => {
                Self::ServiceUnavailable {
                    message: error.to_string(),
                    correlation_id: unassigned(),
                }
            }
            ApplicationError::NotFound(message) => {
                Self::NotFound { message, correlation_id: unassigned() }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::plan::PlanId;
    use crate::domain::rule::{RuleId, RuleType};
    use crate::domain::transaction::TransactionId;
    use crate::errors::{ApplicationError, CommissionError, InterfaceError};

    #[test]
    fn rule_configuration_errors_map_to_bad_request() {
        let interface = ApplicationError::from(CommissionError::ConflictingRule {
            rule_id: RuleId::new("R-2"),
            existing_rule_id: RuleId::new("R-1"),
            rule_type: RuleType::Percentage,
            signature: "project=*|client=*|territory=*|product_category=*".to_owned(),
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "req-1"
        ));
        assert!(interface.user_message().contains("Fix the configuration"));
    }

    #[test]
    fn missing_rule_is_distinct_from_configuration_errors() {
        let interface = ApplicationError::from(CommissionError::NoMatchingRule {
            transaction_id: TransactionId::new("T-1"),
            plan_id: PlanId::new("P-1"),
        })
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Unprocessable { .. }));
        assert!(interface.user_message().contains("No commission rule covers"));
    }

    #[test]
    fn unavailable_net_amount_is_reported_as_integrity_issue() {
        let interface = ApplicationError::from(CommissionError::NetAmountUnavailable {
            transaction_id: TransactionId::new("T-1"),
            reason: "returns ledger offline".to_owned(),
        })
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert!(interface.user_message().contains("data integrity"));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("invalid currency".to_owned()).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn out_of_range_amounts_and_plan_values_are_bad_requests() {
        let overflow = ApplicationError::from(CommissionError::AmountOutOfRange {
            transaction_id: TransactionId::new("T-1"),
            step: "percentage formula".to_owned(),
        })
        .into_interface("req-5");
        assert!(matches!(overflow, InterfaceError::BadRequest { .. }));

        let plan = ApplicationError::from(CommissionError::InvalidPlanConfiguration {
            plan_id: PlanId::new("P-1"),
            field: "base_rate".to_owned(),
            reason: "must be within 0..=100 (got 150)".to_owned(),
        })
        .into_interface("req-6");
        assert!(matches!(plan, InterfaceError::BadRequest { .. }));
    }

    #[test]
    fn missing_records_map_to_not_found() {
        let interface = ApplicationError::NotFound("sales transaction `T-9`".to_owned())
            .into_interface("req-7");

        assert!(matches!(interface, InterfaceError::NotFound { .. }));
        assert!(interface.user_message().contains("does not exist"));
    }

    #[test]
    fn error_kinds_are_stable_codes() {
        let error = CommissionError::InvalidRuleConfiguration {
            rule_id: RuleId::new("R-1"),
            field: "percentage".to_owned(),
            reason: "must be within 0..=100 (got 150)".to_owned(),
        };
        assert_eq!(error.kind(), "invalid_rule_configuration");
        assert!(error.to_string().contains("percentage must be within 0..=100 (got 150)"));
    }
}
