use std::time::Duration;

use dbbuddy_core::config::{ConfigError, DatabaseEngine, EngineConfig};
use secrecy::ExposeSecret;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgConnection};
use thiserror::Error;
use tracing::debug;

use crate::sqlserver::sqlserver_database_exists;

pub type DbPool = sqlx::PgPool;

const UNDEFINED_DATABASE: &str = "3D000";

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0} targets have no pooled query access")]
    UnsupportedEngine(DatabaseEngine),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("SQL Server error: {0}")]
    SqlServer(#[from] tiberius::error::Error),
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out connecting to {host}:{port}")]
    Timeout { host: String, port: u16 },
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .connect(database_url)
        .await
}

/// Pooled access (queries, catalog, bulk load through sqlx) is Postgres only;
/// SQL Server goes through [`crate::sqlserver`].
pub fn connect_options(
    config: &EngineConfig,
    engine: DatabaseEngine,
) -> Result<PgConnectOptions, ConnectError> {
    if engine != DatabaseEngine::Postgres {
        return Err(ConnectError::UnsupportedEngine(engine));
    }

    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .database(config.require_database(engine)?);
    if let Some(password) = &config.password {
        options = options.password(password.expose_secret());
    }
    Ok(options)
}

/// Pool for the configured target database of `engine`.
pub async fn connect(config: &EngineConfig, engine: DatabaseEngine) -> Result<DbPool, ConnectError> {
    let options = connect_options(config, engine)?;
    debug!(
        event_name = "db.connect",
        host = %config.host,
        port = config.port,
        max_connections = config.max_connections,
        "opening database pool"
    );
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Connects once and runs `SELECT 1`. A missing database is `Ok(false)`;
/// any other failure is returned.
pub async fn database_exists(options: &PgConnectOptions) -> Result<bool, sqlx::Error> {
    match PgConnection::connect_with(options).await {
        Ok(mut connection) => {
            sqlx::query("SELECT 1").execute(&mut connection).await?;
            connection.close().await?;
            Ok(true)
        }
        Err(sqlx::Error::Database(error)) if error.code().as_deref() == Some(UNDEFINED_DATABASE) => {
            Ok(false)
        }
        Err(error) => Err(error),
    }
}

/// Whether the configured target database of `engine` exists.
pub async fn target_database_exists(
    config: &EngineConfig,
    engine: DatabaseEngine,
) -> Result<bool, ConnectError> {
    match engine {
        DatabaseEngine::Postgres => Ok(database_exists(&connect_options(config, engine)?).await?),
        DatabaseEngine::SqlServer => {
            sqlserver_database_exists(config, config.require_database(engine)?).await
        }
    }
}

#[cfg(test)]
mod tests {
    use dbbuddy_core::config::{AppConfig, DatabaseEngine};
    use secrecy::SecretString;

    use super::{connect_options, target_database_exists, ConnectError};

    #[test]
    fn options_carry_engine_settings() {
        let mut config = AppConfig::default().postgres;
        config.host = "10.0.0.5".to_string();
        config.port = 6543;
        config.user = "loader".to_string();
        config.database = Some("taxi".to_string());
        config.password = Some(SecretString::from("pw".to_string()));

        let options = connect_options(&config, DatabaseEngine::Postgres).expect("options");
        assert_eq!(options.get_host(), "10.0.0.5");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_username(), "loader");
        assert_eq!(options.get_database(), Some("taxi"));
    }

    #[test]
    fn options_require_a_database_name() {
        let mut config = AppConfig::default().postgres;
        config.database = None;
        let error = connect_options(&config, DatabaseEngine::Postgres).expect_err("no database");
        assert!(matches!(error, ConnectError::Config(_)));
    }

    #[test]
    fn pooled_options_are_postgres_only() {
        let mut config = AppConfig::default().sqlserver;
        config.database = Some("taxi".to_string());
        let error = connect_options(&config, DatabaseEngine::SqlServer).expect_err("unsupported");
        assert!(matches!(error, ConnectError::UnsupportedEngine(DatabaseEngine::SqlServer)));
    }

    #[tokio::test]
    async fn sqlserver_existence_check_needs_a_database_name() {
        let mut config = AppConfig::default().sqlserver;
        config.database = None;
        config.password = Some(SecretString::from("pw".to_string()));

        let error = target_database_exists(&config, DatabaseEngine::SqlServer)
            .await
            .expect_err("no database");
        assert!(matches!(error, ConnectError::Config(_)));
    }
}
