use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::ConnectOptions;
use std::time::Duration;

use crate::config::DbInfo;
use crate::error::{IngestError, Result, UploadStage};

/// Filter directive that surfaces sqlx statement logging
pub const SQL_LOG_DIRECTIVE: &str = "sqlx::query=debug";

pub fn connect_options(db: &DbInfo) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&db.db_host)
        .port(db.db_port)
        .database(&db.db_name)
        .username(&db.db_user)
        .password(&db.db_password)
        .application_name("epf-ingest");

    if db.log_sql_statements {
        options
    } else {
        options.disable_statement_logging()
    }
}

/// Open a connection pool for the configured database
///
/// The pool connects lazily per checkout, but one connection is opened here so
/// bad credentials surface before any file is touched.
pub async fn create_pool(db: &DbInfo) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .acquire_timeout(Duration::from_secs(db.connect_timeout_secs))
        .connect_with(connect_options(db))
        .await
        .map_err(|e| IngestError::upload(db.db_name.as_str(), UploadStage::Connect, e))?;

    tracing::info!(
        host = %db.db_host,
        port = db.db_port,
        database = %db.db_name,
        max_connections = db.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}
