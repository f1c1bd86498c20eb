pub mod calculate;
pub mod check_plan;
pub mod config;
pub mod migrate;
pub mod recalculate;

use std::fs;
use std::path::Path;

use anyhow::Context;
use commissions_core::config::{AppConfig, LoadOptions};
use commissions_core::errors::{ApplicationError, InterfaceError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_INPUT: u8 = 3;
pub const EXIT_RUNTIME: u8 = 4;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::build(command, None, message.into(), None, None, 0)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: &impl Serialize,
    ) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self::build(command, None, message.into(), None, Some(data), 0),
            Err(error) => Self::failure(command, "serialization", error.to_string(), EXIT_RUNTIME),
        }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::build(command, Some(error_class), message.into(), None, None, exit_code)
    }

    pub fn failure_with_data(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        data: &impl Serialize,
        exit_code: u8,
    ) -> Self {
        let data = serde_json::to_value(data).ok();
        Self::build(command, Some(error_class), message.into(), None, data, exit_code)
    }

    /// Maps an application error onto its interface class, exit code and operator-facing text.
    pub fn rejected(
        command: &str,
        error_class: &str,
        error: ApplicationError,
        correlation_id: &str,
    ) -> Self {
        let interface = error.into_interface(correlation_id);
        let exit_code = match interface {
            InterfaceError::BadRequest { .. }
            | InterfaceError::NotFound { .. }
            | InterfaceError::Unprocessable { .. } => EXIT_INPUT,
            InterfaceError::ServiceUnavailable { .. } | InterfaceError::Internal { .. } => {
                EXIT_RUNTIME
            }
        };
        tracing::warn!(
            error_class,
            correlation_id,
            error = %interface,
            "command rejected"
        );
        Self::build(
            command,
            Some(error_class),
            interface.to_string(),
            Some(interface.user_message().to_string()),
            None,
            exit_code,
        )
    }

    fn build(
        command: &str,
        error_class: Option<&str>,
        message: String,
        user_message: Option<String>,
        data: Option<Value>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: if error_class.is_some() { "error" } else { "ok" }.to_string(),
            error_class: error_class.map(str::to_string),
            message,
            user_message,
            data,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        let message = error.to_string().replace('\\', "\\\\").replace('"', "\\\"");
        format!(
            concat!(
                "{{\"command\":\"unknown\",\"status\":\"error\",",
                "\"error_class\":\"serialization\",\"message\":\"{}\"}}"
            ),
            message
        )
    })
}

pub(crate) fn load_config(command: &str, options: LoadOptions) -> Result<AppConfig, CommandResult> {
    AppConfig::load(options).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            EXIT_CONFIG,
        )
    })
}

pub(crate) fn current_thread_runtime(
    command: &str,
) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            EXIT_RUNTIME,
        )
    })
}

fn parse_document<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read input `{}`", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("could not parse input `{}`", path.display()))
}

pub(crate) fn read_document<T: DeserializeOwned>(
    command: &str,
    path: &Path,
) -> Result<T, CommandResult> {
    parse_document(path).map_err(|error| {
        CommandResult::failure(command, "input_validation", format!("{error:#}"), EXIT_INPUT)
    })
}

/// Correlation id for audit events raised by one CLI invocation.
pub(crate) fn correlation_id(command: &str) -> String {
    format!("cli-{command}-{}", chrono::Utc::now().timestamp_millis())
}
