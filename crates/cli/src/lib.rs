pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dbbuddy_core::config::DatabaseEngine;
use dbbuddy_core::ingest::Dialect;
use uuid::Uuid;

use crate::commands::catalog::Listing;

#[derive(Debug, Parser)]
#[command(
    name = "dbbuddy",
    about = "DB Buddy provisioning CLI",
    long_about = "Provision managed database instances, documentation buckets and the SQL Server connector, then seed target databases from CSV.",
    after_help = "Examples:\n  dbbuddy provision postgres\n  dbbuddy seed postgres --rows 1000\n  dbbuddy catalog instances sqlserver\n  dbbuddy query postgres \"SELECT 1\" --database analytics\n  dbbuddy schema source-data/postgres/taxi.csv --dialect sqlserver\n  dbbuddy doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Ensure the docs bucket, documents, instance and database for an engine")]
    Provision {
        engine: DatabaseEngine,
        #[arg(long, help = "Skip the docs bucket and document upload")]
        skip_docs: bool,
    },
    #[command(about = "Ensure the SQL Server integration connector")]
    Connector,
    #[command(about = "Load the seed CSV into the engine's target database")]
    Seed {
        engine: DatabaseEngine,
        #[arg(long, help = "CSV file to load instead of the configured seed file")]
        file: Option<PathBuf>,
        #[arg(long, help = "Maximum number of data rows to read")]
        rows: Option<usize>,
    },
    #[command(about = "Print the inferred schema and DDL for a CSV file without a database")]
    Schema {
        file: PathBuf,
        #[arg(long, help = "SQL dialect for the DDL (postgres|sqlserver)")]
        dialect: Option<Dialect>,
        #[arg(long, help = "Table name (defaults to seed.table)")]
        table: Option<String>,
        #[arg(long, help = "Maximum number of data rows to read")]
        rows: Option<usize>,
    },
    #[command(about = "Run a SQL statement against the engine's target database")]
    Query {
        engine: DatabaseEngine,
        sql: String,
        #[arg(long, help = "Database to run against instead of the configured one")]
        database: Option<String>,
    },
    #[command(about = "List managed instances, server databases or public tables")]
    Catalog {
        #[command(subcommand)]
        target: CatalogTarget,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, control-plane credentials and target database readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum CatalogTarget {
    #[command(about = "Managed instances in the project, optionally of one engine")]
    Instances { engine: Option<DatabaseEngine> },
    #[command(about = "Databases on the engine's server")]
    Databases { engine: DatabaseEngine },
    #[command(about = "Public tables of the engine's target database")]
    Tables {
        engine: DatabaseEngine,
        #[arg(long, help = "Database to list instead of the configured one")]
        database: Option<String>,
    },
}

impl From<CatalogTarget> for Listing {
    fn from(target: CatalogTarget) -> Self {
        match target {
            CatalogTarget::Instances { engine } => Listing::Instances(engine),
            CatalogTarget::Databases { engine } => Listing::Databases(engine),
            CatalogTarget::Tables { engine, database } => Listing::Tables { engine, database },
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let correlation_id = Uuid::new_v4().to_string();
    tracing::debug!(
        event_name = "cli.invoked",
        correlation_id = %correlation_id,
        command = ?cli.command,
        "dispatching command"
    );

    let result = match cli.command {
        Command::Provision { engine, skip_docs } => {
            commands::provision::run(engine, skip_docs, &correlation_id)
        }
        Command::Connector => commands::connector::run(&correlation_id),
        Command::Seed { engine, file, rows } => {
            commands::seed::run(engine, file, rows, &correlation_id)
        }
        Command::Schema { file, dialect, table, rows } => {
            commands::schema::run(&file, dialect, table, rows)
        }
        Command::Query { engine, sql, database } => {
            commands::query::run(engine, &sql, database, &correlation_id)
        }
        Command::Catalog { target } => commands::catalog::run(target.into()),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
