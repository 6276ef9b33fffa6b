use grantflow_core::config::{AppConfig, LoadOptions};
use grantflow_db::{connect_with_config, migrations};
use serde::Serialize;

use crate::commands::{escape_json, runtime, CommandResult};

const CONFIG_VALIDATION: &str = "config_validation";
const DATABASE_CONNECTIVITY: &str = "database_connectivity";
const SCHEMA_MIGRATIONS: &str = "schema_migrations";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult::rendered(exit_code, output)
}

fn build_report() -> DoctorReport {
    let checks = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            let mut checks =
                vec![DoctorCheck::pass(CONFIG_VALIDATION, "configuration loaded and validated")];
            checks.extend(check_database(&config));
            checks
        }
        Err(error) => vec![
            DoctorCheck::fail(CONFIG_VALIDATION, error.to_string()),
            DoctorCheck::skipped(DATABASE_CONNECTIVITY, "configuration did not load"),
            DoctorCheck::skipped(SCHEMA_MIGRATIONS, "configuration did not load"),
        ],
    };

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Connectivity and schema state share one connection attempt.
fn check_database(config: &AppConfig) -> [DoctorCheck; 2] {
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return [
                DoctorCheck::fail(
                    DATABASE_CONNECTIVITY,
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped(SCHEMA_MIGRATIONS, "the async runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return [
                    DoctorCheck::fail(
                        DATABASE_CONNECTIVITY,
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped(SCHEMA_MIGRATIONS, "the database is unreachable"),
                ];
            }
        };

        let connectivity = DoctorCheck::pass(
            DATABASE_CONNECTIVITY,
            format!("connected using `{}`", config.database.url),
        );
        let expected = migrations::embedded_count();
        let schema = match migrations::applied_count(&pool).await {
            Ok(applied) if usize::try_from(applied).is_ok_and(|applied| applied == expected) => {
                DoctorCheck::pass(SCHEMA_MIGRATIONS, format!("{expected} migrations applied"))
            }
            Ok(applied) => DoctorCheck::fail(
                SCHEMA_MIGRATIONS,
                format!("{applied} of {expected} migrations applied; run `grantflow migrate`"),
            ),
            Err(_) => DoctorCheck::fail(
                SCHEMA_MIGRATIONS,
                "no migration history found; run `grantflow migrate`",
            ),
        };

        pool.close().await;
        [connectivity, schema]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
