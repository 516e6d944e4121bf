//! SQL Server targets over TDS.

use std::time::Duration;

use dbbuddy_core::config::{ConfigError, DatabaseEngine, EngineConfig};
use secrecy::ExposeSecret;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::connection::ConnectError;

pub type SqlServerClient = Client<Compat<TcpStream>>;

/// Existence checks run against the server's catalog database.
pub const SYSTEM_DATABASE: &str = "master";

pub fn sqlserver_config(config: &EngineConfig, database: &str) -> Result<Config, ConnectError> {
    let password = config.password.as_ref().ok_or_else(|| {
        ConfigError::Validation(
            "sqlserver.password is required for this command (set DBBUDDY_SQLSERVER_PASSWORD)"
                .to_string(),
        )
    })?;

    let mut tds = Config::new();
    tds.host(&config.host);
    tds.port(config.port);
    tds.database(database);
    tds.authentication(AuthMethod::sql_server(&config.user, password.expose_secret()));
    // The local auth proxy presents a self-signed certificate.
    tds.trust_cert();
    Ok(tds)
}

pub async fn connect_sqlserver(
    config: &EngineConfig,
    database: &str,
) -> Result<SqlServerClient, ConnectError> {
    let tds = sqlserver_config(config, database)?;
    debug!(
        event_name = "db.connect",
        engine = %DatabaseEngine::SqlServer,
        host = %config.host,
        port = config.port,
        database = database,
        "opening SQL Server connection"
    );

    let wait = Duration::from_secs(config.timeout_secs.max(1));
    let tcp = timeout(wait, TcpStream::connect(tds.get_addr()))
        .await
        .map_err(|_| ConnectError::Timeout { host: config.host.clone(), port: config.port })??;
    tcp.set_nodelay(true)?;

    Ok(Client::connect(tds, tcp.compat_write()).await?)
}

/// Looks `database` up in `sys.databases` through the system database.
pub async fn sqlserver_database_exists(
    config: &EngineConfig,
    database: &str,
) -> Result<bool, ConnectError> {
    let mut client = connect_sqlserver(config, SYSTEM_DATABASE).await?;
    let row = client
        .query("SELECT name FROM sys.databases WHERE name = @P1", &[&database])
        .await?
        .into_row()
        .await?;
    client.close().await?;
    Ok(row.is_some())
}
