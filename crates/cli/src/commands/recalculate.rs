use commissions_core::batch::{BatchItemOutcome, BatchReport};
use commissions_core::config::LoadOptions;
use commissions_core::domain::transaction::TransactionId;
use commissions_db::{connect_with_config, CommissionService};

use crate::commands::{
    correlation_id, current_thread_runtime, load_config, CommandResult, EXIT_INPUT, EXIT_RUNTIME,
};

const COMMAND: &str = "recalculate";

pub fn run(transaction_ids: &[String], options: LoadOptions) -> CommandResult {
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match current_thread_runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let ids: Vec<TransactionId> = transaction_ids.iter().map(TransactionId::new).collect();
    let correlation_id = correlation_id(COMMAND);

    let result = runtime.block_on(async {
        let pool =
            connect_with_config(&config.database).await.map_err(|error| error.to_string())?;
        let service = CommissionService::sqlite(pool.clone(), config.calculation.currency());
        let report = service.recalculate_many(&ids, &correlation_id).await;
        pool.close().await;
        Ok::<BatchReport, String>(report)
    });

    let report = match result {
        Ok(report) => report,
        Err(error) => {
            return CommandResult::failure(COMMAND, "db_connectivity", error, EXIT_RUNTIME);
        }
    };

    let summary = format!(
        "{} calculated, {} recalculated, {} skipped, {} failed",
        report.calculated() + report.already_calculated(),
        report.recalculated(),
        report.skipped(),
        report.failed()
    );
    if !report.has_failures() {
        return CommandResult::success_with_data(COMMAND, summary, &report);
    }

    CommandResult::failure_with_data(
        COMMAND,
        "batch_failures",
        summary,
        &report,
        failure_exit_code(&report),
    )
}

/// Storage failures are runtime problems; anything else points at the requested ids.
fn failure_exit_code(report: &BatchReport) -> u8 {
    let persistence_failed = report.items.iter().any(|item| {
        matches!(&item.outcome, BatchItemOutcome::Failed { kind, .. } if kind == "persistence")
    });
    if persistence_failed {
        EXIT_RUNTIME
    } else {
        EXIT_INPUT
    }
}
