pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use commissions_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};

#[derive(Debug, Parser)]
#[command(
    name = "commissions",
    about = "Commission calculation operator CLI",
    long_about = "Calculate commissions from input documents, check plan health, apply migrations, \
                  recalculate stored transactions, and inspect effective configuration.",
    after_help = "Examples:\n  \
                  commissions calculate --input sale.json\n  \
                  commissions check-plan --input plan.json\n  \
                  commissions recalculate --transaction T-1 --transaction T-2\n  \
                  commissions config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a commissions.toml file (must exist when given)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Calculate the commission for one transaction described in a JSON document")]
    Calculate {
        #[arg(long, help = "JSON document with transaction, plan, rules, and linked_returns")]
        input: PathBuf,
    },
    #[command(about = "Report conflicts, invalid rules, and stale priorities for a plan")]
    CheckPlan {
        #[arg(long, help = "JSON document with plan and rules")]
        input: PathBuf,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Calculate stored transactions in a batch, skipping ones already calculated")]
    Recalculate {
        #[arg(long = "transaction", required = true, help = "Transaction id (repeatable)")]
        transactions: Vec<String>,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

/// Installs the global subscriber. Output goes to stderr so stdout stays one JSON line.
pub fn init_logging(config: &LoggingConfig) {
    use tracing::Level;

    let log_level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder =
        tracing_subscriber::fmt().with_writer(std::io::stderr).with_max_level(log_level);

    // A subscriber may already be installed when commands run inside tests.
    let _ = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        ..LoadOptions::default()
    };

    // Config failures are reported by the command itself.
    if let Ok(config) = AppConfig::load(options.clone()) {
        init_logging(&config.logging);
    }

    let result = match cli.command {
        Command::Calculate { input } => commands::calculate::run(&input, options),
        Command::CheckPlan { input } => commands::check_plan::run(&input, options),
        Command::Migrate => commands::migrate::run(options),
        Command::Recalculate { transactions } => {
            commands::recalculate::run(&transactions, options)
        }
        Command::Config => commands::config::run(options),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
