use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use dbbuddy_cli::commands::catalog::{self, Listing};
use dbbuddy_cli::commands::{config, connector, doctor, provision, query, schema, seed};
use dbbuddy_core::config::DatabaseEngine;
use dbbuddy_core::ingest::Dialect;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::runtime::Runtime;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INSTANCE_PATH: &str = "/sql/v1beta4/projects/demo/instances/pg-main";
const DATABASE_PATH: &str = "/sql/v1beta4/projects/demo/instances/pg-main/databases/taxi";
const LIVE_URL_VAR: &str = "DBBUDDY_TEST_DATABASE_URL";

#[test]
fn schema_prints_inferred_columns_and_ddl() {
    with_env(&[], || {
        let dir = TempDir::new().expect("tempdir");
        let csv = dir.path().join("taxi.csv");
        fs::write(&csv, "VendorID,Fare Amount,Pickup Datetime\n1,12.5,2023-01-01 08:15:00\n")
            .expect("write csv");

        let result = schema::run(&csv, Some(Dialect::SqlServer), None, None);
        assert_eq!(result.exit_code, 0, "expected schema success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "schema");
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("- fare_amount float"));
        assert!(message.contains(
            "IF OBJECT_ID(N'nyc_taxi_data', N'U') IS NULL CREATE TABLE [nyc_taxi_data]"
        ));
    });
}

#[test]
fn schema_reports_missing_file_as_ingest_failure() {
    with_env(&[], || {
        let dir = TempDir::new().expect("tempdir");
        let result = schema::run(&dir.path().join("absent.csv"), None, None, None);
        assert_eq!(result.exit_code, 5);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "ingest");
    });
}

#[test]
fn provision_returns_config_failure_without_project() {
    with_env(&[], || {
        let result = provision::run(DatabaseEngine::Postgres, true, "test");
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "provision");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn provision_leaves_ready_resources_untouched() {
    let runtime = Runtime::new().expect("runtime");
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        mount_ready_instance(&server).await;
        Mock::given(method("GET"))
            .and(path(DATABASE_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"charset": "UTF8", "collation": "en_US.UTF8"})),
            )
            .mount(&server)
            .await;
        for verb in ["POST", "PATCH"] {
            Mock::given(method(verb))
                .respond_with(ResponseTemplate::new(500))
                .expect(0)
                .mount(&server)
                .await;
        }
        server
    });

    with_cloud_env(&server.uri(), || {
        let result = provision::run(DatabaseEngine::Postgres, true, "test");
        assert_eq!(result.exit_code, 0, "expected provision success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("instance `pg-main` ready in state RUNNABLE (none)"));
        assert!(message.contains("database `pg-main/taxi` ready in state READY (none)"));
    });
}

#[test]
fn provision_creates_missing_database_and_waits_for_it() {
    let runtime = Runtime::new().expect("runtime");
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        mount_ready_instance(&server).await;
        Mock::given(method("GET"))
            .and(path(DATABASE_PATH))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(DATABASE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"charset": "UTF8"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{INSTANCE_PATH}/databases")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "op-db"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sql/v1beta4/projects/demo/operations/op-db"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"name": "op-db", "status": "DONE"})),
            )
            .mount(&server)
            .await;
        server
    });

    with_cloud_env(&server.uri(), || {
        let result = provision::run(DatabaseEngine::Postgres, true, "test");
        assert_eq!(result.exit_code, 0, "expected provision success: {}", result.output);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("database `pg-main/taxi` ready in state READY (created)"));
    });
}

#[test]
fn provision_reports_failed_instance_as_verification_failure() {
    let runtime = Runtime::new().expect("runtime");
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(INSTANCE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "FAILED"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(DATABASE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;
        server
    });

    with_cloud_env(&server.uri(), || {
        let result = provision::run(DatabaseEngine::Postgres, true, "test");
        assert_eq!(result.exit_code, 6, "expected verification failure: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "verification");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("FAILED"));
    });
}

#[test]
fn connector_requires_connection_settings() {
    with_env(&[("DBBUDDY_PROJECT_ID", "demo")], || {
        let result = connector::run("test");
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "connector");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn sqlserver_seed_requires_a_password_before_connecting() {
    with_env(&[("DBBUDDY_SQLSERVER_DATABASE", "taxi")], || {
        let dir = TempDir::new().expect("tempdir");
        let csv = dir.path().join("taxi.csv");
        fs::write(&csv, "id\n1\n").expect("write csv");

        let result = seed::run(DatabaseEngine::SqlServer, Some(csv), None, "test");
        assert_eq!(result.exit_code, 2, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["error_class"], "config_validation");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("DBBUDDY_SQLSERVER_PASSWORD"), "unexpected message: {message}");
    });
}

#[test]
fn sqlserver_seed_requires_a_database_name() {
    with_env(&[("DBBUDDY_SQLSERVER_PASSWORD", "Str0ng!")], || {
        let dir = TempDir::new().expect("tempdir");
        let csv = dir.path().join("taxi.csv");
        fs::write(&csv, "id\n1\n").expect("write csv");

        let result = seed::run(DatabaseEngine::SqlServer, Some(csv), None, "test");
        assert_eq!(result.exit_code, 2, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("DBBUDDY_SQLSERVER_DATABASE"), "unexpected message: {message}");
    });
}

#[test]
fn catalog_lists_instances_of_one_engine() {
    let runtime = Runtime::new().expect("runtime");
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sql/v1beta4/projects/demo/instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"name": "pg-main", "databaseVersion": "POSTGRES_15", "state": "RUNNABLE"},
                    {"name": "mssql-main", "databaseVersion": "SQLSERVER_2019_STANDARD", "state": "RUNNABLE"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        server
    });

    with_cloud_env(&server.uri(), || {
        let result = catalog::run(Listing::Instances(Some(DatabaseEngine::SqlServer)));
        assert_eq!(result.exit_code, 0, "expected catalog success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "catalog");
        assert_eq!(payload["message"], "mssql-main (SQLSERVER_2019_STANDARD, RUNNABLE)");
    });
}

#[test]
fn catalog_instances_require_a_project() {
    with_env(&[], || {
        let result = catalog::run(Listing::Instances(None));
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("DBBUDDY_PROJECT_ID"), "unexpected message: {message}");
    });
}

#[test]
fn failing_statement_exits_with_execution_code() {
    let Some(vars) = live_postgres_env() else {
        return;
    };
    let pairs: Vec<(&str, &str)> = vars.iter().map(|(key, value)| (*key, value.as_str())).collect();

    with_env(&pairs, || {
        let result = query::run(
            DatabaseEngine::Postgres,
            "SELECT * FROM dbbuddy_table_that_does_not_exist",
            None,
            "test",
        );
        assert_eq!(result.exit_code, 5, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "query");
        assert_eq!(payload["error_class"], "execution");
    });
}

#[test]
fn database_override_reaches_the_server() {
    let Some(vars) = live_postgres_env() else {
        return;
    };
    let mut pairs: Vec<(&str, &str)> =
        vars.iter().map(|(key, value)| (*key, value.as_str())).collect();
    pairs.retain(|(key, _)| *key != "DBBUDDY_POSTGRES_DATABASE");
    pairs.push(("DBBUDDY_POSTGRES_DATABASE", "dbbuddy_database_that_does_not_exist"));
    let database = vars
        .iter()
        .find(|(key, _)| *key == "DBBUDDY_POSTGRES_DATABASE")
        .map(|(_, value)| value.clone())
        .unwrap_or_default();

    with_env(&pairs, || {
        let result = query::run(
            DatabaseEngine::Postgres,
            "SELECT current_database()::text AS current_database",
            Some(database.clone()),
            "test",
        );
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or_default();
        assert_eq!(message, format!("current_database\n{database}"));
    });
}

#[test]
fn seed_requires_a_seed_file_when_none_is_given() {
    with_env(&[], || {
        let result = seed::run(DatabaseEngine::Postgres, None, None, "test");
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("DBBUDDY_POSTGRES_SEED_FILE"));
    });
}

#[test]
fn config_redacts_secrets_and_attributes_env_sources() {
    with_env(
        &[("DBBUDDY_POSTGRES_PASSWORD", "hunter2"), ("DBBUDDY_PROJECT_ID", "demo")],
        || {
            let result = config::run();
            assert_eq!(result.exit_code, 0);

            let payload = parse_payload(&result.output);
            let message = payload["message"].as_str().unwrap_or_default();
            assert!(!message.contains("hunter2"));
            assert!(message.contains(
                "- postgres.password = <redacted> (source: env (DBBUDDY_POSTGRES_PASSWORD))"
            ));
            assert!(message.contains("- cloud.project_id = demo (source: env (DBBUDDY_PROJECT_ID))"));
            assert!(message.contains("- seed.table = nyc_taxi_data (source: default)"));
        },
    );
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("DBBUDDY_POLL_MAX_ATTEMPTS", "0")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 6);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "fail");
        let checks = report["checks"].as_array().cloned().unwrap_or_default();
        assert_eq!(checks.len(), 4);
        assert_eq!(checks[0]["status"], "fail");
        assert!(checks[1..].iter().all(|check| check["status"] == "skipped"));
    });
}

#[test]
fn doctor_passes_with_static_token_and_no_target_database() {
    with_env(
        &[
            ("DBBUDDY_PROJECT_ID", "demo"),
            ("DBBUDDY_DOCS_BUCKET", "demo-docs"),
            ("DBBUDDY_ACCESS_TOKEN", "test-token"),
        ],
        || {
            let result = doctor::run(true);
            assert_eq!(result.exit_code, 0, "unexpected report: {}", result.output);

            let report = parse_payload(&result.output);
            assert_eq!(report["overall_status"], "pass");
            let checks = report["checks"].as_array().cloned().unwrap_or_default();
            let credentials = checks
                .iter()
                .find(|check| check["name"] == "control_plane_credentials")
                .cloned()
                .unwrap_or_default();
            assert_eq!(credentials["status"], "pass");
            let database = checks
                .iter()
                .find(|check| check["name"] == "target_database")
                .cloned()
                .unwrap_or_default();
            assert_eq!(database["status"], "skipped");
        },
    );
}

async fn mount_ready_instance(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(INSTANCE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "RUNNABLE",
            "databaseVersion": "POSTGRES_15",
            "region": "us-central1",
            "settings": {
                "tier": "db-f1-micro",
                "databaseFlags": [{"name": "cloudsql.iam_authentication", "value": "on"}]
            }
        })))
        .mount(server)
        .await;
}

fn cloud_env(uri: &str) -> Vec<(&'static str, String)> {
    vec![
        ("DBBUDDY_PROJECT_ID", "demo".to_string()),
        ("DBBUDDY_ACCESS_TOKEN", "test-token".to_string()),
        ("DBBUDDY_SQL_ADMIN_URL", uri.to_string()),
        ("DBBUDDY_STORAGE_URL", uri.to_string()),
        ("DBBUDDY_CONNECTORS_URL", uri.to_string()),
        ("DBBUDDY_POSTGRES_INSTANCE", "pg-main".to_string()),
        ("DBBUDDY_POSTGRES_DATABASE", "taxi".to_string()),
        ("DBBUDDY_POSTGRES_REGION", "us-central1".to_string()),
        ("DBBUDDY_POLL_OPERATION_INTERVAL_SECS", "0".to_string()),
        ("DBBUDDY_POLL_READINESS_INTERVAL_SECS", "0".to_string()),
        ("DBBUDDY_POLL_MAX_INTERVAL_SECS", "0".to_string()),
        ("DBBUDDY_POLL_MAX_ATTEMPTS", "3".to_string()),
    ]
}

/// Postgres target settings from `DBBUDDY_TEST_DATABASE_URL`, read before
/// `with_env` clears the `DBBUDDY_` variables.
fn live_postgres_env() -> Option<Vec<(&'static str, String)>> {
    let raw = match env::var(LIVE_URL_VAR) {
        Ok(raw) if !raw.trim().is_empty() => raw,
        _ => {
            eprintln!("{LIVE_URL_VAR} not set; skipping live Postgres test");
            return None;
        }
    };
    let url = Url::parse(&raw).expect("DBBUDDY_TEST_DATABASE_URL should be a valid URL");

    let mut vars = vec![
        ("DBBUDDY_POSTGRES_HOST", url.host_str().unwrap_or("localhost").to_string()),
        ("DBBUDDY_POSTGRES_PORT", url.port().unwrap_or(5432).to_string()),
        ("DBBUDDY_POSTGRES_USER", url.username().to_string()),
        ("DBBUDDY_POSTGRES_DATABASE", url.path().trim_start_matches('/').to_string()),
    ];
    if let Some(password) = url.password() {
        vars.push(("DBBUDDY_POSTGRES_PASSWORD", password.to_string()));
    }
    Some(vars)
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_cloud_env(uri: &str, test_fn: impl FnOnce()) {
    let vars = cloud_env(uri);
    let pairs: Vec<(&str, &str)> = vars.iter().map(|(key, value)| (*key, value.as_str())).collect();
    with_env(&pairs, test_fn);
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let previous_values: Vec<(String, String)> =
        env::vars().filter(|(key, _)| key.starts_with("DBBUDDY_")).collect();

    for (key, _) in &previous_values {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    let touched: Vec<String> =
        env::vars().map(|(key, _)| key).filter(|key| key.starts_with("DBBUDDY_")).collect();
    for key in touched {
        env::remove_var(key);
    }
    for (key, value) in previous_values {
        env::set_var(key, value);
    }
}
