use std::path::Path;

use commissions_core::config::LoadOptions;
use commissions_core::domain::plan::CommissionPlan;
use commissions_core::domain::rule::CommissionRule;
use commissions_core::precedence::check_plan_health;
use serde::Deserialize;

use crate::commands::{load_config, read_document, CommandResult, EXIT_INPUT};

const COMMAND: &str = "check-plan";

#[derive(Debug, Deserialize)]
struct PlanInput {
    plan: CommissionPlan,
    #[serde(default)]
    rules: Vec<CommissionRule>,
}

pub fn run(input: &Path, options: LoadOptions) -> CommandResult {
    if let Err(result) = load_config(COMMAND, options) {
        return result;
    }
    let document: PlanInput = match read_document(COMMAND, input) {
        Ok(document) => document,
        Err(result) => return result,
    };

    let report = check_plan_health(&document.plan, &document.rules);
    for warning in &report.warnings {
        tracing::warn!(plan_id = %report.plan_id, warning = %warning, "plan health warning");
    }

    if report.healthy {
        let message = format!(
            "plan `{}` is healthy ({} active rules)",
            report.plan_id, report.active_rule_count
        );
        return CommandResult::success_with_data(COMMAND, message, &report);
    }

    let message = format!(
        "plan `{}` is unhealthy: {} plan issues, {} conflicts, {} invalid rules, \
         {} stale priorities",
        report.plan_id,
        report.plan_issues.len(),
        report.conflicts.len(),
        report.invalid_rules.len(),
        report.stale_priorities.len()
    );
    CommandResult::failure_with_data(COMMAND, "plan_unhealthy", message, &report, EXIT_INPUT)
}
