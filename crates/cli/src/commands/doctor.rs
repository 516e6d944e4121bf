use dbbuddy_core::config::{AppConfig, DatabaseEngine, LoadOptions};
use dbbuddy_db::target_database_exists;
use dbbuddy_gcp::Credentials;
use serde::Serialize;
use tokio::runtime::Runtime;

use crate::commands::CommandResult;

const EXIT_NOT_READY: u8 = 6;

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

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_NOT_READY };

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

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_project_settings(&config));

            match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => {
                    checks.push(check_credentials(&runtime, &config));
                    checks.push(check_target_database(&runtime, &config));
                }
                Err(error) => {
                    for name in ["control_plane_credentials", "target_database"] {
                        checks.push(DoctorCheck {
                            name,
                            status: CheckStatus::Fail,
                            details: format!("failed to initialize async runtime: {error}"),
                        });
                    }
                }
            }
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["project_settings", "control_plane_credentials", "target_database"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_project_settings(config: &AppConfig) -> DoctorCheck {
    let missing = [
        config.require_project().err().map(|error| error.to_string()),
        config.require_docs_bucket().err().map(|error| error.to_string()),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();

    if missing.is_empty() {
        DoctorCheck {
            name: "project_settings",
            status: CheckStatus::Pass,
            details: "project id and docs bucket are configured".to_string(),
        }
    } else {
        DoctorCheck { name: "project_settings", status: CheckStatus::Fail, details: missing.join("; ") }
    }
}

fn check_credentials(runtime: &Runtime, config: &AppConfig) -> DoctorCheck {
    let result = runtime.block_on(async {
        let credentials = Credentials::from_config(&config.cloud).await?;
        credentials.bearer().await?;
        Ok::<_, dbbuddy_core::errors::ControlPlaneError>(credentials.describe())
    });

    match result {
        Ok(source) => DoctorCheck {
            name: "control_plane_credentials",
            status: CheckStatus::Pass,
            details: format!("bearer token obtained from {source}"),
        },
        Err(error) => DoctorCheck {
            name: "control_plane_credentials",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_target_database(runtime: &Runtime, config: &AppConfig) -> DoctorCheck {
    let engine = DatabaseEngine::Postgres;
    let target = config.engine(engine);
    if target.database.is_none() {
        return DoctorCheck {
            name: "target_database",
            status: CheckStatus::Skipped,
            details: "postgres.database is not configured".to_string(),
        };
    }

    let result = runtime.block_on(async {
        target_database_exists(target, engine)
            .await
            .map_err(|error| format!("failed to connect: {error}"))
    });

    match result {
        Ok(true) => DoctorCheck {
            name: "target_database",
            status: CheckStatus::Pass,
            details: format!("connected to {}:{}", target.host, target.port),
        },
        Ok(false) => DoctorCheck {
            name: "target_database",
            status: CheckStatus::Fail,
            details: format!("database does not exist on {}:{}", target.host, target.port),
        },
        Err(error) => {
            DoctorCheck { name: "target_database", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

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

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
