use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use chrono::{NaiveDate, TimeZone, Utc};
use commissions_cli::commands::{calculate, check_plan, config, migrate, recalculate};
use commissions_core::config::LoadOptions;
use commissions_core::domain::plan::{CommissionPlan, PlanId};
use commissions_core::domain::rule::{CommissionRule, RuleId, RuleKind, RuleScope};
use commissions_core::domain::transaction::{OrganizationId, SalesTransaction, TransactionId};
use commissions_db::repositories::{
    PlanRepository, SqlPlanRepository, SqlTransactionRepository, TransactionRepository,
};
use commissions_db::connect;
use rust_decimal::Decimal;
use serde_json::{json, Value};

const CALCULATION_INPUT: &str = r#"{
  "transaction": {
    "id": "T-1",
    "organization_id": "org-1",
    "amount": "1000",
    "transaction_date": "2026-04-01",
    "client_id": "CL-1"
  },
  "plan": { "id": "P-1", "organization_id": "org-1", "name": "FY26" },
  "rules": [
    {
      "id": "R-default",
      "plan_id": "P-1",
      "kind": { "type": "PERCENTAGE", "percentage": "10" },
      "created_at": "2026-01-01T00:00:00Z"
    },
    {
      "id": "R-client",
      "plan_id": "P-1",
      "kind": { "type": "PERCENTAGE", "percentage": "12" },
      "scope": { "client_id": "CL-1" },
      "created_at": "2026-01-01T00:00:00Z"
    }
  ],
  "linked_returns": [
    {
      "id": "T-1-R",
      "organization_id": "org-1",
      "amount": "-200",
      "transaction_date": "2026-04-03",
      "kind": "RETURN",
      "parent_transaction_id": "T-1"
    }
  ]
}"#;

#[test]
fn calculate_applies_the_most_specific_rule_to_net_sales() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_file(dir.path(), "sale.json", CALCULATION_INPUT);

    with_env(&[("COMMISSIONS_DATABASE_URL", "sqlite::memory:")], || {
        let result = calculate::run(&input, LoadOptions::default());
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "calculate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["outcome"]["amount"], "96.00");
        assert_eq!(payload["data"]["outcome"]["metadata"]["calculation"]["rule_id"], "R-client");

        let explanation = payload["data"]["explanation"].as_array().expect("explanation lines");
        assert!(explanation.iter().any(|line| line.as_str().unwrap_or("").contains("96.00")));
    });
}

#[test]
fn calculate_uses_configured_default_basis_when_plan_omits_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_file(dir.path(), "sale.json", CALCULATION_INPUT);

    with_env(&[("COMMISSIONS_CALCULATION_DEFAULT_BASIS", "gross")], || {
        let result = calculate::run(&input, LoadOptions::default());
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["outcome"]["amount"], "120.00");
    });
}

#[test]
fn calculate_reports_no_matching_rule_as_input_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut document: Value = serde_json::from_str(CALCULATION_INPUT).expect("fixture parses");
    document["transaction"]["client_id"] = json!("CL-2");
    document["rules"] = json!([document["rules"][1].clone()]);
    let input = write_file(dir.path(), "sale.json", &document.to_string());

    with_env(&[], || {
        let result = calculate::run(&input, LoadOptions::default());
        assert_eq!(result.exit_code, 3);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "no_matching_rule");
        assert!(payload["message"].as_str().unwrap_or("").starts_with("unprocessable:"));
        assert!(payload["user_message"]
            .as_str()
            .unwrap_or("")
            .contains("No commission rule covers this transaction"));
    });
}

#[test]
fn calculate_only_validates_active_rules_of_the_plan() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut document: Value = serde_json::from_str(CALCULATION_INPUT).expect("fixture parses");
    let rules = document["rules"].as_array_mut().expect("rules array");
    rules.push(json!({
        "id": "R-retired",
        "plan_id": "P-1",
        "kind": { "type": "PERCENTAGE", "percentage": "250" },
        "is_active": false,
        "created_at": "2025-01-01T00:00:00Z"
    }));
    rules.push(json!({
        "id": "R-other-plan",
        "plan_id": "P-2",
        "kind": { "type": "PERCENTAGE", "percentage": "-5" },
        "created_at": "2025-01-01T00:00:00Z"
    }));
    let input = write_file(dir.path(), "sale.json", &document.to_string());

    with_env(&[], || {
        let result = calculate::run(&input, LoadOptions::default());
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);
        assert_eq!(parse_payload(&result.output)["data"]["outcome"]["amount"], "96.00");
    });
}

#[test]
fn calculate_rejects_plan_base_rate_above_one_hundred() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut document: Value = serde_json::from_str(CALCULATION_INPUT).expect("fixture parses");
    document["plan"]["base_rate"] = json!("150");
    let input = write_file(dir.path(), "sale.json", &document.to_string());

    with_env(&[], || {
        let result = calculate::run(&input, LoadOptions::default());
        assert_eq!(result.exit_code, 3, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "invalid_plan_configuration");
        assert!(payload["user_message"].as_str().is_some());
    });
}

#[test]
fn calculate_rejects_malformed_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_file(dir.path(), "sale.json", "{ \"transaction\": ");

    with_env(&[], || {
        let result = calculate::run(&input, LoadOptions::default());
        assert_eq!(result.exit_code, 3);
        assert_eq!(parse_payload(&result.output)["error_class"], "input_validation");

        let missing = calculate::run(&dir.path().join("absent.json"), LoadOptions::default());
        assert_eq!(missing.exit_code, 3);
    });
}

#[test]
fn calculate_returns_config_failure_for_invalid_env() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_file(dir.path(), "sale.json", CALCULATION_INPUT);

    with_env(&[("COMMISSIONS_CALCULATION_MINOR_UNITS", "two")], || {
        let result = calculate::run(&input, LoadOptions::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "calculate");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn check_plan_reports_healthy_and_conflicting_plans() {
    let dir = tempfile::tempdir().expect("tempdir");
    let plan = json!({ "id": "P-1", "organization_id": "org-1", "name": "FY26" });
    let default_rule = |id: &str, percentage: &str| {
        json!({
            "id": id,
            "plan_id": "P-1",
            "kind": { "type": "PERCENTAGE", "percentage": percentage },
            "created_at": "2026-01-01T00:00:00Z"
        })
    };
    let client_rule = json!({
        "id": "R-client",
        "plan_id": "P-1",
        "kind": { "type": "FLAT_AMOUNT", "amount": "50" },
        "scope": { "client_id": "CL-1" },
        "priority": 20,
        "created_at": "2026-01-01T00:00:00Z"
    });

    let healthy = write_file(
        dir.path(),
        "healthy.json",
        &json!({ "plan": plan, "rules": [default_rule("R-1", "10"), client_rule] }).to_string(),
    );
    let conflicting = write_file(
        dir.path(),
        "conflicting.json",
        &json!({ "plan": plan, "rules": [default_rule("R-1", "10"), default_rule("R-2", "12")] })
            .to_string(),
    );

    with_env(&[], || {
        let result = check_plan::run(&healthy, LoadOptions::default());
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["healthy"], true);
        assert_eq!(payload["data"]["has_default_rule"], true);

        let result = check_plan::run(&conflicting, LoadOptions::default());
        assert_eq!(result.exit_code, 3);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "plan_unhealthy");
        assert_eq!(payload["data"]["conflicts"].as_array().map(Vec::len), Some(1));
    });
}

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("COMMISSIONS_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn recalculate_runs_the_batch_against_a_migrated_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database_url = format!("sqlite://{}?mode=rwc", dir.path().join("ledger.db").display());

    with_env(&[("COMMISSIONS_DATABASE_URL", database_url.as_str())], || {
        let migrated = migrate::run(LoadOptions::default());
        assert_eq!(migrated.exit_code, 0, "unexpected output: {}", migrated.output);
        seed_ledger(&database_url);

        let ids = vec!["T-1".to_string(), "T-missing".to_string()];
        let result = recalculate::run(&ids, LoadOptions::default());
        assert_eq!(result.exit_code, 3, "unexpected output: {}", result.output);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "batch_failures");
        assert_eq!(payload["data"]["items"][0]["outcome"], "calculated");
        assert_eq!(payload["data"]["items"][0]["amount"], "100.00");
        assert_eq!(payload["data"]["items"][1]["kind"], "transaction_not_found");
        assert!(payload["data"]["items"][1]["user_message"].as_str().is_some());

        let rerun = recalculate::run(&["T-1".to_string()], LoadOptions::default());
        assert_eq!(rerun.exit_code, 0, "unexpected output: {}", rerun.output);
        let payload = parse_payload(&rerun.output);
        assert_eq!(payload["data"]["items"][0]["outcome"], "recalculated");
        assert_eq!(payload["data"]["items"][0]["previous_amount"], "100.00");
        assert_eq!(payload["data"]["items"][0]["amount"], "100.00");
    });
}

#[test]
fn config_reports_sources_for_env_and_file_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = write_file(
        dir.path(),
        "commissions.toml",
        "[database]\nurl = \"sqlite::memory:\"\n\n[logging]\nformat = \"json\"\n",
    );
    let options = LoadOptions {
        config_path: Some(config_path.clone()),
        require_file: true,
        ..LoadOptions::default()
    };

    with_env(&[("COMMISSIONS_CALCULATION_CURRENCY", "EUR")], || {
        let result = config::run(options);
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        let fields = payload["data"]["fields"].as_array().expect("fields");
        let field = |key: &str| {
            fields.iter().find(|field| field["key"] == key).cloned().unwrap_or(Value::Null)
        };

        assert_eq!(field("calculation.currency")["value"], "EUR");
        assert_eq!(
            field("calculation.currency")["source"],
            "env (COMMISSIONS_CALCULATION_CURRENCY)"
        );
        assert_eq!(
            field("database.url")["source"],
            format!("file ({})", config_path.display()).as_str()
        );
        assert_eq!(field("logging.format")["value"], "json");
        assert_eq!(field("calculation.minor_units")["source"], "default");

        let layers = payload["data"]["layers"].as_array().expect("layers");
        assert!(layers.iter().any(|layer| layer == "env"));
    });
}

fn seed_ledger(database_url: &str) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    runtime.block_on(async {
        let pool = connect(database_url).await.expect("connect");
        let plans = SqlPlanRepository::new(pool.clone());
        let transactions = SqlTransactionRepository::new(pool.clone());

        plans
            .save_plan(CommissionPlan::new(
                PlanId::new("P-1"),
                OrganizationId::new("org-1"),
                "FY26",
            ))
            .await
            .expect("save plan");
        plans
            .save_rule(CommissionRule::draft(
                RuleId::new("R-1"),
                PlanId::new("P-1"),
                RuleKind::Percentage { percentage: Decimal::new(10, 0) },
                RuleScope::default(),
                Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid timestamp"),
            ))
            .await
            .expect("save rule");
        transactions
            .save_transaction(SalesTransaction::sale(
                TransactionId::new("T-1"),
                OrganizationId::new("org-1"),
                Decimal::new(1000, 0),
                NaiveDate::from_ymd_opt(2026, 4, 1).expect("valid date"),
            ))
            .await
            .expect("save transaction");
        pool.close().await;
    });
}

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("fixture should be writable");
    path
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "COMMISSIONS_DATABASE_URL",
        "COMMISSIONS_DATABASE_MAX_CONNECTIONS",
        "COMMISSIONS_DATABASE_TIMEOUT_SECS",
        "COMMISSIONS_CALCULATION_CURRENCY",
        "COMMISSIONS_CALCULATION_MINOR_UNITS",
        "COMMISSIONS_CALCULATION_DEFAULT_BASIS",
        "COMMISSIONS_LOGGING_LEVEL",
        "COMMISSIONS_LOGGING_FORMAT",
        "COMMISSIONS_LOG_LEVEL",
        "COMMISSIONS_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
