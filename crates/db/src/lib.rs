pub mod catalog;
pub mod connection;
pub mod loader;
pub mod sqlserver;

pub use catalog::{execute_query, list_databases, list_tables, QueryOutput};
pub use connection::{
    connect, connect_options, connect_with_settings, database_exists, target_database_exists,
    ConnectError, DbPool,
};
pub use loader::{load_table, seed_from_csv, LoadError, LoadReport, SeedTarget};
pub use sqlserver::{connect_sqlserver, sqlserver_database_exists, SqlServerClient};
