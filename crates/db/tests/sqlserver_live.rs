use std::fs;

use chrono::Utc;
use dbbuddy_core::config::{AppConfig, DatabaseEngine, EngineConfig};
use dbbuddy_db::{
    connect_sqlserver, seed_from_csv, sqlserver_database_exists, target_database_exists,
    SeedTarget,
};
use secrecy::SecretString;
use tempfile::TempDir;

const HOST_VAR: &str = "DBBUDDY_TEST_SQLSERVER_HOST";

type LiveResult<T = ()> = Result<T, String>;

/// `DBBUDDY_TEST_SQLSERVER_HOST` enables these tests; port, user, password and
/// database come from the matching `DBBUDDY_TEST_SQLSERVER_*` variables.
fn target() -> Option<EngineConfig> {
    let host = match std::env::var(HOST_VAR) {
        Ok(host) if !host.trim().is_empty() => host,
        _ => {
            eprintln!("{HOST_VAR} not set; skipping live SQL Server test");
            return None;
        }
    };
    let var = |name: &str, default: &str| {
        std::env::var(format!("DBBUDDY_TEST_SQLSERVER_{name}"))
            .unwrap_or_else(|_| default.to_string())
    };

    let mut config = AppConfig::default().sqlserver;
    config.host = host;
    config.port = var("PORT", "1433").parse().unwrap_or(1433);
    config.user = var("USER", "sa");
    config.password = Some(SecretString::from(var("PASSWORD", "")));
    config.database = Some(var("DATABASE", "tempdb"));
    Some(config)
}

fn unique_name(prefix: &str) -> String {
    format!("{prefix}_{}", Utc::now().timestamp_micros())
}

#[tokio::test]
async fn existence_check_reads_sys_databases() -> LiveResult {
    let Some(config) = target() else {
        return Ok(());
    };

    if !target_database_exists(&config, DatabaseEngine::SqlServer)
        .await
        .map_err(|error| error.to_string())?
    {
        return Err("configured database should exist".to_string());
    }
    if sqlserver_database_exists(&config, &unique_name("dbbuddy_missing"))
        .await
        .map_err(|error| error.to_string())?
    {
        return Err("random database name should not exist".to_string());
    }
    Ok(())
}

#[tokio::test]
async fn seed_creates_table_and_inserts_every_row() -> LiveResult {
    let Some(config) = target() else {
        return Ok(());
    };
    let database = config.database.clone().unwrap_or_default();
    let table = unique_name("dbbuddy_seed");

    let dir = TempDir::new().map_err(|error| error.to_string())?;
    let csv = dir.path().join("taxi.csv");
    fs::write(
        &csv,
        "VendorID,Fare Amount,Pickup Datetime,Store Flag\n\
         1,12.5,2023-01-01 08:15:00,N\n\
         2,,2023-01-01 09:00:00,Y\n\
         1,1e300,2023-01-02 10:30:00,\n",
    )
    .map_err(|error| error.to_string())?;

    let mut client =
        connect_sqlserver(&config, &database).await.map_err(|error| format!("connect: {error}"))?;
    let report = seed_from_csv(SeedTarget::SqlServer(&mut client), &table, &csv, 100, 2)
        .await
        .map_err(|error| format!("seed: {error}"))?;

    let count = client
        .query(format!("SELECT COUNT_BIG(*) FROM [{table}]"), &[])
        .await
        .map_err(|error| error.to_string())?
        .into_row()
        .await
        .map_err(|error| error.to_string())?
        .and_then(|row| row.get::<i64, _>(0));
    client
        .execute(format!("DROP TABLE [{table}]"), &[])
        .await
        .map_err(|error| error.to_string())?;
    client.close().await.map_err(|error| error.to_string())?;

    if report.rows_inserted != 3 || report.batches != 2 || report.columns != 4 {
        return Err(format!("unexpected report: {report:?}"));
    }
    if count != Some(3) {
        return Err(format!("unexpected row count: {count:?}"));
    }
    Ok(())
}
