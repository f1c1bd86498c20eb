use commissions_core::config::LoadOptions;
use commissions_db::{connect_with_config, migrations};

use crate::commands::{current_thread_runtime, load_config, CommandResult, EXIT_RUNTIME};

const COMMAND: &str = "migrate";

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match current_thread_runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string()))?;
        migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string()))?;
        pool.close().await;
        Ok::<(), (&'static str, String)>(())
    });

    match result {
        Ok(()) => {
            tracing::info!(database_url = %config.database.url, "applied pending migrations");
            CommandResult::success(COMMAND, "applied pending migrations")
        }
        Err((error_class, message)) => {
            CommandResult::failure(COMMAND, error_class, message, EXIT_RUNTIME)
        }
    }
}
