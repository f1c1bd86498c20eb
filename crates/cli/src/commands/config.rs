use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use commissions_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};
use serde::Serialize;
use toml::Value;

use crate::commands::{load_config, CommandResult};

const COMMAND: &str = "config";

#[derive(Debug, Serialize)]
struct ConfigField {
    key: &'static str,
    value: String,
    source: String,
}

#[derive(Debug, Serialize)]
struct ConfigReport {
    fields: Vec<ConfigField>,
    layers: Vec<String>,
}

pub fn run(options: LoadOptions) -> CommandResult {
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let file = FileLayer { doc: config_file_doc.as_ref(), path: config_file_path.as_deref() };

    let fields = effective_values(&config)
        .into_iter()
        .map(|(key, value, env_keys)| ConfigField {
            key,
            value,
            source: field_source(key, env_keys, &file),
        })
        .collect();

    CommandResult::success_with_data(
        COMMAND,
        "effective config (source precedence: env > file > default)",
        &ConfigReport { fields, layers: config.sources },
    )
}

type FieldValue = (&'static str, String, &'static [&'static str]);

fn field(key: &'static str, value: String, env_keys: &'static [&'static str]) -> FieldValue {
    (key, value, env_keys)
}

fn effective_values(config: &AppConfig) -> Vec<FieldValue> {
    let database = &config.database;
    let calculation = &config.calculation;
    let logging = &config.logging;

    vec![
        field("database.url", database.url.clone(), &["COMMISSIONS_DATABASE_URL"]),
        field(
            "database.max_connections",
            database.max_connections.to_string(),
            &["COMMISSIONS_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            database.timeout_secs.to_string(),
            &["COMMISSIONS_DATABASE_TIMEOUT_SECS"],
        ),
        field(
            "calculation.currency",
            calculation.currency.clone(),
            &["COMMISSIONS_CALCULATION_CURRENCY"],
        ),
        field(
            "calculation.minor_units",
            calculation.minor_units.to_string(),
            &["COMMISSIONS_CALCULATION_MINOR_UNITS"],
        ),
        field(
            "calculation.default_basis",
            calculation.default_basis.as_str().to_string(),
            &["COMMISSIONS_CALCULATION_DEFAULT_BASIS"],
        ),
        field(
            "logging.level",
            logging.level.clone(),
            &["COMMISSIONS_LOGGING_LEVEL", "COMMISSIONS_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", logging.format).to_ascii_lowercase(),
            &["COMMISSIONS_LOGGING_FORMAT", "COMMISSIONS_LOG_FORMAT"],
        ),
    ]
}

struct FileLayer<'a> {
    doc: Option<&'a Value>,
    path: Option<&'a Path>,
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from(DEFAULT_CONFIG_FILE);
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config").join(DEFAULT_CONFIG_FILE);
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(key_path: &str, env_keys: &[&str], file: &FileLayer<'_>) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = file.doc {
        if contains_path(doc, key_path) {
            let file_path = file
                .path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
