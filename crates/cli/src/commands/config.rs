use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dbbuddy_core::config::{
    env_segment, resolve_config_path, AppConfig, DatabaseEngine, EngineConfig,
};
use secrecy::SecretString;
use toml::Value;

use crate::commands::{load_config, CommandResult};

const COMMAND: &str = "config";

pub fn run() -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let file_path = resolve_config_path(None);
    let sources = Sources { doc: load_config_file_doc(file_path.as_deref()), path: file_path };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    render_cloud(&config, &sources, &mut lines);
    for engine in [DatabaseEngine::Postgres, DatabaseEngine::SqlServer] {
        render_engine(engine, config.engine(engine), &sources, &mut lines);
    }
    render_connector(&config, &sources, &mut lines);
    render_seed_and_poll(&config, &sources, &mut lines);

    lines.push(sources.line("logging.level", &config.logging.level, &[
        "DBBUDDY_LOGGING_LEVEL",
        "DBBUDDY_LOG_LEVEL",
    ]));
    lines.push(sources.line("logging.format", &format!("{:?}", config.logging.format), &[
        "DBBUDDY_LOGGING_FORMAT",
        "DBBUDDY_LOG_FORMAT",
    ]));

    CommandResult::success(COMMAND, lines.join("\n"))
}

struct Sources {
    doc: Option<Value>,
    path: Option<PathBuf>,
}

impl Sources {
    fn line(&self, key_path: &str, value: &str, env_keys: &[&str]) -> String {
        format!("- {key_path} = {value} (source: {})", self.field_source(key_path, env_keys))
    }

    fn field_source(&self, key_path: &str, env_keys: &[&str]) -> String {
        if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }

        if let Some(doc) = &self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .as_deref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn render_cloud(config: &AppConfig, sources: &Sources, lines: &mut Vec<String>) {
    let cloud = &config.cloud;
    lines.push(sources.line("cloud.project_id", optional(&cloud.project_id), &["DBBUDDY_PROJECT_ID"]));
    lines.push(sources.line(
        "cloud.access_token",
        redacted(&cloud.access_token),
        &["DBBUDDY_ACCESS_TOKEN"],
    ));
    lines.push(sources.line("cloud.sql_admin_url", &cloud.sql_admin_url, &["DBBUDDY_SQL_ADMIN_URL"]));
    lines.push(sources.line("cloud.storage_url", &cloud.storage_url, &["DBBUDDY_STORAGE_URL"]));
    lines.push(sources.line(
        "cloud.connectors_url",
        &cloud.connectors_url,
        &["DBBUDDY_CONNECTORS_URL"],
    ));
    lines.push(sources.line(
        "cloud.request_timeout_secs",
        &cloud.request_timeout_secs.to_string(),
        &["DBBUDDY_REQUEST_TIMEOUT_SECS"],
    ));

    let storage = &config.storage;
    lines.push(sources.line(
        "storage.docs_bucket",
        optional(&storage.docs_bucket),
        &["DBBUDDY_DOCS_BUCKET"],
    ));
    lines.push(sources.line("storage.location", &storage.location, &["DBBUDDY_STORAGE_LOCATION"]));
    lines.push(sources.line(
        "storage.docs_dir",
        &storage.docs_dir.display().to_string(),
        &["DBBUDDY_DOCS_DIR"],
    ));
    lines.push(sources.line("storage.prefix", optional(&storage.prefix), &["DBBUDDY_DOCS_PREFIX"]));
}

fn render_engine(
    engine: DatabaseEngine,
    section: &EngineConfig,
    sources: &Sources,
    lines: &mut Vec<String>,
) {
    let segment = env_segment(engine);
    let mut push = |field: &str, value: &str| {
        let key_path = format!("{engine}.{field}");
        let env_key = format!("DBBUDDY_{segment}_{}", field.to_ascii_uppercase());
        lines.push(sources.line(&key_path, value, &[env_key.as_str()]));
    };

    push("instance", optional(&section.instance));
    push("database", optional(&section.database));
    push("region", optional(&section.region));
    push("version", &section.version);
    push("tier", optional(&section.tier));
    push("host", &section.host);
    push("port", &section.port.to_string());
    push("user", &section.user);
    push("password", redacted(&section.password));
    push("seed_file", optional(&section.seed_file));
    push("max_connections", &section.max_connections.to_string());
    push("timeout_secs", &section.timeout_secs.to_string());
}

fn render_connector(config: &AppConfig, sources: &Sources, lines: &mut Vec<String>) {
    let connector = &config.connector;
    lines.push(sources.line(
        "connector.connection_id",
        optional(&connector.connection_id),
        &["DBBUDDY_CONNECTOR_ID"],
    ));
    lines.push(sources.line(
        "connector.region",
        optional(&connector.region),
        &["DBBUDDY_CONNECTOR_REGION"],
    ));
    lines.push(sources.line(
        "connector.display_name",
        optional(&connector.display_name),
        &["DBBUDDY_CONNECTOR_DISPLAY_NAME"],
    ));
    lines.push(sources.line(
        "connector.password_secret",
        optional(&connector.password_secret),
        &["DBBUDDY_CONNECTOR_PASSWORD_SECRET"],
    ));
    lines.push(sources.line(
        "connector.service_account",
        optional(&connector.service_account),
        &["DBBUDDY_CONNECTOR_SERVICE_ACCOUNT"],
    ));
}

fn render_seed_and_poll(config: &AppConfig, sources: &Sources, lines: &mut Vec<String>) {
    let seed = &config.seed;
    lines.push(sources.line("seed.table", &seed.table, &["DBBUDDY_SEED_TABLE"]));
    lines.push(sources.line(
        "seed.source_dir",
        &seed.source_dir.display().to_string(),
        &["DBBUDDY_SEED_SOURCE_DIR"],
    ));
    lines.push(sources.line("seed.max_rows", &seed.max_rows.to_string(), &["DBBUDDY_SEED_MAX_ROWS"]));
    lines.push(sources.line(
        "seed.batch_size",
        &seed.batch_size.to_string(),
        &["DBBUDDY_SEED_BATCH_SIZE"],
    ));

    let poll = &config.poll;
    for (field, value) in [
        ("operation_interval_secs", poll.operation_interval_secs.to_string()),
        ("readiness_interval_secs", poll.readiness_interval_secs.to_string()),
        ("max_interval_secs", poll.max_interval_secs.to_string()),
        ("multiplier", poll.multiplier.to_string()),
        ("max_attempts", poll.max_attempts.to_string()),
        ("jitter_pct", poll.jitter_pct.to_string()),
    ] {
        let env_key = format!("DBBUDDY_POLL_{}", field.to_ascii_uppercase());
        lines.push(sources.line(&format!("poll.{field}"), &value, &[env_key.as_str()]));
    }
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
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

fn optional(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("<unset>")
}

fn redacted(value: &Option<SecretString>) -> &'static str {
    if value.is_some() {
        "<redacted>"
    } else {
        "<unset>"
    }
}
