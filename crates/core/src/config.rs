use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calculator::rounding::Currency;
use crate::domain::plan::CalculationBasis;

pub const DEFAULT_CONFIG_FILE: &str = "commissions.toml";

#[derive(Clone, Debug, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub calculation: CalculationConfig,
    pub logging: LoggingConfig,
    /// Layers that contributed to this config, lowest precedence first.
    pub sources: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CalculationConfig {
    pub currency: String,
    pub minor_units: u32,
    pub default_basis: CalculationBasis,
}

impl CalculationConfig {
    pub fn currency(&self) -> Currency {
        Currency::new(&self.currency, self.minor_units)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub currency: Option<String>,
    pub minor_units: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://commissions.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            calculation: CalculationConfig {
                currency: "USD".to_string(),
                minor_units: 2,
                default_basis: CalculationBasis::Net,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            sources: vec!["defaults".to_string()],
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
            config.sources.push(format!("file:{}", path.display()));
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        if config.apply_env_overrides()? {
            config.sources.push("env".to_string());
        }
        if config.apply_overrides(options.overrides) {
            config.sources.push("overrides".to_string());
        }
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(calculation) = patch.calculation {
            if let Some(currency) = calculation.currency {
                self.calculation.currency = currency;
            }
            if let Some(minor_units) = calculation.minor_units {
                self.calculation.minor_units = minor_units;
            }
            if let Some(default_basis) = calculation.default_basis {
                self.calculation.default_basis = default_basis;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    /// Returns whether any `COMMISSIONS_*` variable was applied.
    fn apply_env_overrides(&mut self) -> Result<bool, ConfigError> {
        let mut applied = false;

        if let Some(value) = read_env("COMMISSIONS_DATABASE_URL") {
            self.database.url = value;
            applied = true;
        }
        if let Some(value) = read_env("COMMISSIONS_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("COMMISSIONS_DATABASE_MAX_CONNECTIONS", &value)?;
            applied = true;
        }
        if let Some(value) = read_env("COMMISSIONS_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("COMMISSIONS_DATABASE_TIMEOUT_SECS", &value)?;
            applied = true;
        }

        if let Some(value) = read_env("COMMISSIONS_CALCULATION_CURRENCY") {
            self.calculation.currency = value;
            applied = true;
        }
        if let Some(value) = read_env("COMMISSIONS_CALCULATION_MINOR_UNITS") {
            self.calculation.minor_units =
                parse_u32("COMMISSIONS_CALCULATION_MINOR_UNITS", &value)?;
            applied = true;
        }
        if let Some(value) = read_env("COMMISSIONS_CALCULATION_DEFAULT_BASIS") {
            self.calculation.default_basis = CalculationBasis::parse(&value).ok_or_else(|| {
                ConfigError::InvalidEnvOverride {
                    key: "COMMISSIONS_CALCULATION_DEFAULT_BASIS".to_string(),
                    value: value.clone(),
                }
            })?;
            applied = true;
        }

        let log_level =
            read_env("COMMISSIONS_LOGGING_LEVEL").or_else(|| read_env("COMMISSIONS_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
            applied = true;
        }
        let log_format =
            read_env("COMMISSIONS_LOGGING_FORMAT").or_else(|| read_env("COMMISSIONS_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
            applied = true;
        }

        Ok(applied)
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) -> bool {
        let mut applied = false;
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
            applied = true;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
            applied = true;
        }
        if let Some(currency) = overrides.currency {
            self.calculation.currency = currency;
            applied = true;
        }
        if let Some(minor_units) = overrides.minor_units {
            self.calculation.minor_units = minor_units;
            applied = true;
        }
        applied
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_calculation(&self.calculation)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_calculation(calculation: &CalculationConfig) -> Result<(), ConfigError> {
    let code = calculation.currency.trim();
    if code.len() != 3 || !code.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(ConfigError::Validation(format!(
            "calculation.currency must be a 3-letter ISO 4217 code (got `{code}`)"
        )));
    }

    if calculation.minor_units > 4 {
        return Err(ConfigError::Validation(format!(
            "calculation.minor_units must be in range 0..=4 (got {})",
            calculation.minor_units
        )));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    calculation: Option<CalculationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CalculationPatch {
    currency: Option<String>,
    minor_units: Option<u32>,
    default_basis: Option<CalculationBasis>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
