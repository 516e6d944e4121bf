use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["dbbuddy.toml", "config/dbbuddy.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub cloud: CloudConfig,
    pub storage: StorageConfig,
    pub postgres: EngineConfig,
    pub sqlserver: EngineConfig,
    pub connector: ConnectorConfig,
    pub seed: SeedConfig,
    pub poll: PollConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct CloudConfig {
    pub project_id: Option<String>,
    /// Static bearer token. When unset, application default credentials are used.
    pub access_token: Option<SecretString>,
    pub sql_admin_url: String,
    pub storage_url: String,
    pub connectors_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub docs_bucket: Option<String>,
    pub location: String,
    pub docs_dir: PathBuf,
    pub prefix: Option<String>,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub instance: Option<String>,
    pub database: Option<String>,
    pub region: Option<String>,
    pub version: String,
    pub tier: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<SecretString>,
    pub seed_file: Option<String>,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ConnectorConfig {
    pub connection_id: Option<String>,
    pub region: Option<String>,
    pub display_name: Option<String>,
    pub password_secret: Option<String>,
    pub service_account: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SeedConfig {
    pub table: String,
    pub source_dir: PathBuf,
    pub max_rows: usize,
    pub batch_size: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    pub operation_interval_secs: u64,
    pub readiness_interval_secs: u64,
    pub max_interval_secs: u64,
    pub multiplier: u32,
    pub max_attempts: u32,
    pub jitter_pct: u8,
}

#[derive(Clone, Debug)]
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

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseEngine {
    Postgres,
    SqlServer,
}

impl DatabaseEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::SqlServer => "sqlserver",
        }
    }

    fn default_version(&self) -> &'static str {
        match self {
            Self::Postgres => "POSTGRES_15",
            Self::SqlServer => "SQLSERVER_2019_STANDARD",
        }
    }

    fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::SqlServer => 1433,
        }
    }

    fn default_user(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::SqlServer => "sqlserver",
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub project_id: Option<String>,
    pub docs_bucket: Option<String>,
    pub seed_max_rows: Option<usize>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
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

/// Settings needed to create or patch a managed database instance.
#[derive(Clone, Debug)]
pub struct ProvisioningTarget {
    pub engine: DatabaseEngine,
    pub project_id: String,
    pub instance: String,
    pub database: String,
    pub region: String,
    pub version: String,
    pub tier: String,
    pub root_password: Option<SecretString>,
}

/// Settings for the SQL Server integration connection.
#[derive(Clone, Debug)]
pub struct ConnectorTarget {
    pub project_id: String,
    pub region: String,
    pub connection_id: String,
    pub display_name: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub database: String,
    pub password_secret: String,
    pub service_account: Option<String>,
}

impl EngineConfig {
    fn defaults_for(engine: DatabaseEngine) -> Self {
        Self {
            instance: None,
            database: None,
            region: None,
            version: engine.default_version().to_string(),
            tier: None,
            host: "127.0.0.1".to_string(),
            port: engine.default_port(),
            user: engine.default_user().to_string(),
            password: None,
            seed_file: None,
            max_connections: 5,
            timeout_secs: 30,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            operation_interval_secs: 10,
            readiness_interval_secs: 60,
            max_interval_secs: 120,
            multiplier: 2,
            max_attempts: 60,
            jitter_pct: 10,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cloud: CloudConfig {
                project_id: None,
                access_token: None,
                sql_admin_url: "https://sqladmin.googleapis.com".to_string(),
                storage_url: "https://storage.googleapis.com".to_string(),
                connectors_url: "https://connectors.googleapis.com".to_string(),
                request_timeout_secs: 30,
            },
            storage: StorageConfig {
                docs_bucket: None,
                location: "US".to_string(),
                docs_dir: PathBuf::from("documentation"),
                prefix: None,
            },
            postgres: EngineConfig::defaults_for(DatabaseEngine::Postgres),
            sqlserver: EngineConfig::defaults_for(DatabaseEngine::SqlServer),
            connector: ConnectorConfig::default(),
            seed: SeedConfig {
                table: "nyc_taxi_data".to_string(),
                source_dir: PathBuf::from("source-data"),
                max_rows: 100_000,
                batch_size: 500,
            },
            poll: PollConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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

impl std::str::FromStr for DatabaseEngine {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlserver" | "sqlsvr" | "mssql" => Ok(Self::SqlServer),
            other => Err(ConfigError::Validation(format!(
                "unsupported database engine `{other}` (expected postgres|sqlserver)"
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
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn engine(&self, engine: DatabaseEngine) -> &EngineConfig {
        match engine {
            DatabaseEngine::Postgres => &self.postgres,
            DatabaseEngine::SqlServer => &self.sqlserver,
        }
    }

    fn engine_mut(&mut self, engine: DatabaseEngine) -> &mut EngineConfig {
        match engine {
            DatabaseEngine::Postgres => &mut self.postgres,
            DatabaseEngine::SqlServer => &mut self.sqlserver,
        }
    }

    pub fn require_project(&self) -> Result<&str, ConfigError> {
        required(self.cloud.project_id.as_deref(), "cloud.project_id", "DBBUDDY_PROJECT_ID")
    }

    pub fn require_docs_bucket(&self) -> Result<&str, ConfigError> {
        required(self.storage.docs_bucket.as_deref(), "storage.docs_bucket", "DBBUDDY_DOCS_BUCKET")
    }

    /// Seed CSV path for an engine: `<seed.source_dir>/<engine>/<seed_file>`.
    pub fn seed_path(&self, engine: DatabaseEngine) -> Result<PathBuf, ConfigError> {
        let file = required(
            self.engine(engine).seed_file.as_deref(),
            &format!("{engine}.seed_file"),
            &format!("DBBUDDY_{}_SEED_FILE", env_segment(engine)),
        )?;
        Ok(self.seed.source_dir.join(engine.as_str()).join(file))
    }

    pub fn provisioning_target(
        &self,
        engine: DatabaseEngine,
    ) -> Result<ProvisioningTarget, ConfigError> {
        let project_id = self.require_project()?.to_string();
        let section = self.engine(engine);
        let segment = env_segment(engine);

        let instance = required(
            section.instance.as_deref(),
            &format!("{engine}.instance"),
            &format!("DBBUDDY_{segment}_INSTANCE"),
        )?
        .to_string();
        let database = required(
            section.database.as_deref(),
            &format!("{engine}.database"),
            &format!("DBBUDDY_{segment}_DATABASE"),
        )?
        .to_string();
        let region = required(
            section.region.as_deref(),
            &format!("{engine}.region"),
            &format!("DBBUDDY_{segment}_REGION"),
        )?
        .to_string();

        let (tier, root_password) = match engine {
            DatabaseEngine::Postgres => (
                section.tier.clone().unwrap_or_else(|| "db-f1-micro".to_string()),
                section.password.clone(),
            ),
            DatabaseEngine::SqlServer => {
                let tier = required(
                    section.tier.as_deref(),
                    "sqlserver.tier",
                    "DBBUDDY_SQLSERVER_TIER",
                )?
                .to_string();
                let password = section
                    .password
                    .clone()
                    .filter(|value| !value.expose_secret().trim().is_empty())
                    .ok_or_else(|| {
                        ConfigError::Validation(
                            "sqlserver.password is required to create a SQL Server instance (set DBBUDDY_SQLSERVER_PASSWORD)"
                                .to_string(),
                        )
                    })?;
                (tier, Some(password))
            }
        };

        Ok(ProvisioningTarget {
            engine,
            project_id,
            instance,
            database,
            region,
            version: section.version.clone(),
            tier,
            root_password,
        })
    }

    pub fn connector_target(&self) -> Result<ConnectorTarget, ConfigError> {
        let project_id = self.require_project()?.to_string();
        let region = self
            .connector
            .region
            .clone()
            .or_else(|| self.sqlserver.region.clone())
            .ok_or_else(|| {
                ConfigError::Validation(
                    "connector.region is required (set DBBUDDY_CONNECTOR_REGION or sqlserver.region)"
                        .to_string(),
                )
            })?;
        let connection_id = required(
            self.connector.connection_id.as_deref(),
            "connector.connection_id",
            "DBBUDDY_CONNECTOR_ID",
        )?
        .to_string();
        let password_secret = required(
            self.connector.password_secret.as_deref(),
            "connector.password_secret",
            "DBBUDDY_CONNECTOR_PASSWORD_SECRET",
        )?
        .to_string();
        let database = required(
            self.sqlserver.database.as_deref(),
            "sqlserver.database",
            "DBBUDDY_SQLSERVER_DATABASE",
        )?
        .to_string();

        Ok(ConnectorTarget {
            project_id,
            region,
            connection_id,
            display_name: self.connector.display_name.clone(),
            host: self.sqlserver.host.clone(),
            port: self.sqlserver.port,
            username: self.sqlserver.user.clone(),
            database,
            password_secret,
            service_account: self.connector.service_account.clone(),
        })
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(cloud) = patch.cloud {
            if let Some(project_id) = cloud.project_id {
                self.cloud.project_id = Some(project_id);
            }
            if let Some(access_token_value) = cloud.access_token {
                self.cloud.access_token = Some(secret_value(access_token_value));
            }
            if let Some(url) = cloud.sql_admin_url {
                self.cloud.sql_admin_url = url;
            }
            if let Some(url) = cloud.storage_url {
                self.cloud.storage_url = url;
            }
            if let Some(url) = cloud.connectors_url {
                self.cloud.connectors_url = url;
            }
            if let Some(timeout_secs) = cloud.request_timeout_secs {
                self.cloud.request_timeout_secs = timeout_secs;
            }
        }

        if let Some(storage) = patch.storage {
            if let Some(bucket) = storage.docs_bucket {
                self.storage.docs_bucket = Some(bucket);
            }
            if let Some(location) = storage.location {
                self.storage.location = location;
            }
            if let Some(docs_dir) = storage.docs_dir {
                self.storage.docs_dir = docs_dir;
            }
            if let Some(prefix) = storage.prefix {
                self.storage.prefix = Some(prefix);
            }
        }

        if let Some(postgres) = patch.postgres {
            self.postgres.apply_patch(postgres);
        }
        if let Some(sqlserver) = patch.sqlserver {
            self.sqlserver.apply_patch(sqlserver);
        }

        if let Some(connector) = patch.connector {
            if let Some(connection_id) = connector.connection_id {
                self.connector.connection_id = Some(connection_id);
            }
            if let Some(region) = connector.region {
                self.connector.region = Some(region);
            }
            if let Some(display_name) = connector.display_name {
                self.connector.display_name = Some(display_name);
            }
            if let Some(password_secret) = connector.password_secret {
                self.connector.password_secret = Some(password_secret);
            }
            if let Some(service_account) = connector.service_account {
                self.connector.service_account = Some(service_account);
            }
        }

        if let Some(seed) = patch.seed {
            if let Some(table) = seed.table {
                self.seed.table = table;
            }
            if let Some(source_dir) = seed.source_dir {
                self.seed.source_dir = source_dir;
            }
            if let Some(max_rows) = seed.max_rows {
                self.seed.max_rows = max_rows;
            }
            if let Some(batch_size) = seed.batch_size {
                self.seed.batch_size = batch_size;
            }
        }

        if let Some(poll) = patch.poll {
            if let Some(value) = poll.operation_interval_secs {
                self.poll.operation_interval_secs = value;
            }
            if let Some(value) = poll.readiness_interval_secs {
                self.poll.readiness_interval_secs = value;
            }
            if let Some(value) = poll.max_interval_secs {
                self.poll.max_interval_secs = value;
            }
            if let Some(value) = poll.multiplier {
                self.poll.multiplier = value;
            }
            if let Some(value) = poll.max_attempts {
                self.poll.max_attempts = value;
            }
            if let Some(value) = poll.jitter_pct {
                self.poll.jitter_pct = value;
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

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("DBBUDDY_PROJECT_ID") {
            self.cloud.project_id = Some(value);
        }
        if let Some(value) = read_env("DBBUDDY_ACCESS_TOKEN") {
            self.cloud.access_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("DBBUDDY_SQL_ADMIN_URL") {
            self.cloud.sql_admin_url = value;
        }
        if let Some(value) = read_env("DBBUDDY_STORAGE_URL") {
            self.cloud.storage_url = value;
        }
        if let Some(value) = read_env("DBBUDDY_CONNECTORS_URL") {
            self.cloud.connectors_url = value;
        }
        if let Some(value) = read_env("DBBUDDY_REQUEST_TIMEOUT_SECS") {
            self.cloud.request_timeout_secs = parse_u64("DBBUDDY_REQUEST_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("DBBUDDY_DOCS_BUCKET") {
            self.storage.docs_bucket = Some(value);
        }
        if let Some(value) = read_env("DBBUDDY_STORAGE_LOCATION") {
            self.storage.location = value;
        }
        if let Some(value) = read_env("DBBUDDY_DOCS_DIR") {
            self.storage.docs_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("DBBUDDY_DOCS_PREFIX") {
            self.storage.prefix = Some(value);
        }

        for engine in [DatabaseEngine::Postgres, DatabaseEngine::SqlServer] {
            self.engine_mut(engine).apply_env_overrides(env_segment(engine))?;
        }

        if let Some(value) = read_env("DBBUDDY_CONNECTOR_ID") {
            self.connector.connection_id = Some(value);
        }
        if let Some(value) = read_env("DBBUDDY_CONNECTOR_REGION") {
            self.connector.region = Some(value);
        }
        if let Some(value) = read_env("DBBUDDY_CONNECTOR_DISPLAY_NAME") {
            self.connector.display_name = Some(value);
        }
        if let Some(value) = read_env("DBBUDDY_CONNECTOR_PASSWORD_SECRET") {
            self.connector.password_secret = Some(value);
        }
        if let Some(value) = read_env("DBBUDDY_CONNECTOR_SERVICE_ACCOUNT") {
            self.connector.service_account = Some(value);
        }

        if let Some(value) = read_env("DBBUDDY_SEED_TABLE") {
            self.seed.table = value;
        }
        if let Some(value) = read_env("DBBUDDY_SEED_SOURCE_DIR") {
            self.seed.source_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("DBBUDDY_SEED_MAX_ROWS") {
            self.seed.max_rows = parse_usize("DBBUDDY_SEED_MAX_ROWS", &value)?;
        }
        if let Some(value) = read_env("DBBUDDY_SEED_BATCH_SIZE") {
            self.seed.batch_size = parse_usize("DBBUDDY_SEED_BATCH_SIZE", &value)?;
        }

        if let Some(value) = read_env("DBBUDDY_POLL_OPERATION_INTERVAL_SECS") {
            self.poll.operation_interval_secs =
                parse_u64("DBBUDDY_POLL_OPERATION_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("DBBUDDY_POLL_READINESS_INTERVAL_SECS") {
            self.poll.readiness_interval_secs =
                parse_u64("DBBUDDY_POLL_READINESS_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("DBBUDDY_POLL_MAX_INTERVAL_SECS") {
            self.poll.max_interval_secs = parse_u64("DBBUDDY_POLL_MAX_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("DBBUDDY_POLL_MULTIPLIER") {
            self.poll.multiplier = parse_u32("DBBUDDY_POLL_MULTIPLIER", &value)?;
        }
        if let Some(value) = read_env("DBBUDDY_POLL_MAX_ATTEMPTS") {
            self.poll.max_attempts = parse_u32("DBBUDDY_POLL_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("DBBUDDY_POLL_JITTER_PCT") {
            self.poll.jitter_pct = parse_u8("DBBUDDY_POLL_JITTER_PCT", &value)?;
        }

        let log_level = read_env("DBBUDDY_LOGGING_LEVEL").or_else(|| read_env("DBBUDDY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("DBBUDDY_LOGGING_FORMAT").or_else(|| read_env("DBBUDDY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(project_id) = overrides.project_id {
            self.cloud.project_id = Some(project_id);
        }
        if let Some(docs_bucket) = overrides.docs_bucket {
            self.storage.docs_bucket = Some(docs_bucket);
        }
        if let Some(max_rows) = overrides.seed_max_rows {
            self.seed.max_rows = max_rows;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    /// Structural checks only; commands call the `require_*` helpers for the
    /// settings they actually need.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_cloud(&self.cloud)?;
        validate_engine("postgres", &self.postgres)?;
        validate_engine("sqlserver", &self.sqlserver)?;
        validate_seed(&self.seed)?;
        validate_poll(&self.poll)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

impl EngineConfig {
    fn apply_patch(&mut self, patch: EnginePatch) {
        if let Some(instance) = patch.instance {
            self.instance = Some(instance);
        }
        if let Some(database) = patch.database {
            self.database = Some(database);
        }
        if let Some(region) = patch.region {
            self.region = Some(region);
        }
        if let Some(version) = patch.version {
            self.version = version;
        }
        if let Some(tier) = patch.tier {
            self.tier = Some(tier);
        }
        if let Some(host) = patch.host {
            self.host = host;
        }
        if let Some(port) = patch.port {
            self.port = port;
        }
        if let Some(user) = patch.user {
            self.user = user;
        }
        if let Some(password_value) = patch.password {
            self.password = Some(secret_value(password_value));
        }
        if let Some(seed_file) = patch.seed_file {
            self.seed_file = Some(seed_file);
        }
        if let Some(max_connections) = patch.max_connections {
            self.max_connections = max_connections;
        }
        if let Some(timeout_secs) = patch.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
    }

    fn apply_env_overrides(&mut self, segment: &str) -> Result<(), ConfigError> {
        let key = |field: &str| format!("DBBUDDY_{segment}_{field}");

        if let Some(value) = read_env(&key("INSTANCE")) {
            self.instance = Some(value);
        }
        if let Some(value) = read_env(&key("DATABASE")) {
            self.database = Some(value);
        }
        if let Some(value) = read_env(&key("REGION")) {
            self.region = Some(value);
        }
        if let Some(value) = read_env(&key("VERSION")) {
            self.version = value;
        }
        if let Some(value) = read_env(&key("TIER")) {
            self.tier = Some(value);
        }
        if let Some(value) = read_env(&key("HOST")) {
            self.host = value;
        }
        if let Some(value) = read_env(&key("PORT")) {
            self.port = parse_u16(&key("PORT"), &value)?;
        }
        if let Some(value) = read_env(&key("USER")) {
            self.user = value;
        }
        if let Some(value) = read_env(&key("PASSWORD")) {
            self.password = Some(secret_value(value));
        }
        if let Some(value) = read_env(&key("SEED_FILE")) {
            self.seed_file = Some(value);
        }
        if let Some(value) = read_env(&key("MAX_CONNECTIONS")) {
            self.max_connections = parse_u32(&key("MAX_CONNECTIONS"), &value)?;
        }
        if let Some(value) = read_env(&key("TIMEOUT_SECS")) {
            self.timeout_secs = parse_u64(&key("TIMEOUT_SECS"), &value)?;
        }
        Ok(())
    }

    pub fn require_database(&self, engine: DatabaseEngine) -> Result<&str, ConfigError> {
        required(
            self.database.as_deref(),
            &format!("{engine}.database"),
            &format!("DBBUDDY_{}_DATABASE", env_segment(engine)),
        )
    }
}

/// Upper-case segment used in `DBBUDDY_<ENGINE>_*` variable names.
pub fn env_segment(engine: DatabaseEngine) -> &'static str {
    match engine {
        DatabaseEngine::Postgres => "POSTGRES",
        DatabaseEngine::SqlServer => "SQLSERVER",
    }
}

fn required<'a>(value: Option<&'a str>, key: &str, env_key: &str) -> Result<&'a str, ConfigError> {
    value.map(str::trim).filter(|value| !value.is_empty()).ok_or_else(|| {
        ConfigError::Validation(format!("{key} is required for this command (set {env_key})"))
    })
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_FILES.into_iter().map(PathBuf::from).find(|path| path.exists())
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

fn validate_cloud(cloud: &CloudConfig) -> Result<(), ConfigError> {
    for (key, url) in [
        ("cloud.sql_admin_url", &cloud.sql_admin_url),
        ("cloud.storage_url", &cloud.storage_url),
        ("cloud.connectors_url", &cloud.connectors_url),
    ] {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{key} must start with http:// or https://"
            )));
        }
    }

    if cloud.request_timeout_secs == 0 || cloud.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "cloud.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if let Some(token) = &cloud.access_token {
        if token.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "cloud.access_token must not be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_engine(section: &str, engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.port == 0 {
        return Err(ConfigError::Validation(format!("{section}.port must be greater than zero")));
    }

    if engine.max_connections == 0 {
        return Err(ConfigError::Validation(format!(
            "{section}.max_connections must be greater than zero"
        )));
    }

    if engine.timeout_secs == 0 || engine.timeout_secs > 300 {
        return Err(ConfigError::Validation(format!(
            "{section}.timeout_secs must be in range 1..=300"
        )));
    }

    if engine.version.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{section}.version must not be empty")));
    }

    Ok(())
}

fn validate_seed(seed: &SeedConfig) -> Result<(), ConfigError> {
    if seed.table.trim().is_empty() {
        return Err(ConfigError::Validation("seed.table must not be empty".to_string()));
    }

    if seed.max_rows == 0 {
        return Err(ConfigError::Validation("seed.max_rows must be greater than zero".to_string()));
    }

    if seed.batch_size == 0 || seed.batch_size > 10_000 {
        return Err(ConfigError::Validation(
            "seed.batch_size must be in range 1..=10000".to_string(),
        ));
    }

    Ok(())
}

fn validate_poll(poll: &PollConfig) -> Result<(), ConfigError> {
    if poll.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "poll.max_attempts must be greater than zero".to_string(),
        ));
    }

    if poll.multiplier == 0 {
        return Err(ConfigError::Validation("poll.multiplier must be at least 1".to_string()));
    }

    if poll.jitter_pct > 100 {
        return Err(ConfigError::Validation("poll.jitter_pct must be in range 0..=100".to_string()));
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

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u8(key: &str, value: &str) -> Result<u8, ConfigError> {
    value.parse::<u8>().map_err(|_| invalid_override(key, value))
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    cloud: Option<CloudPatch>,
    storage: Option<StoragePatch>,
    postgres: Option<EnginePatch>,
    sqlserver: Option<EnginePatch>,
    connector: Option<ConnectorPatch>,
    seed: Option<SeedPatch>,
    poll: Option<PollPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct CloudPatch {
    project_id: Option<String>,
    access_token: Option<String>,
    sql_admin_url: Option<String>,
    storage_url: Option<String>,
    connectors_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    docs_bucket: Option<String>,
    location: Option<String>,
    docs_dir: Option<PathBuf>,
    prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    instance: Option<String>,
    database: Option<String>,
    region: Option<String>,
    version: Option<String>,
    tier: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    seed_file: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConnectorPatch {
    connection_id: Option<String>,
    region: Option<String>,
    display_name: Option<String>,
    password_secret: Option<String>,
    service_account: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SeedPatch {
    table: Option<String>,
    source_dir: Option<PathBuf>,
    max_rows: Option<usize>,
    batch_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PollPatch {
    operation_interval_secs: Option<u64>,
    readiness_interval_secs: Option<u64>,
    max_interval_secs: Option<u64>,
    multiplier: Option<u32>,
    max_attempts: Option<u32>,
    jitter_pct: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
