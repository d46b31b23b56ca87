//! EPF Ingest - loads EPF flat files from the ready inbox into Postgres

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use epf_common::logging::{init_logging, LogLevel};
use epf_ingest::config::DEFAULT_CONFIG_PATH;
use epf_ingest::db::{create_pool, SQL_LOG_DIRECTIVE};
use epf_ingest::{check_file, AppConfig, IngestionPipeline, TableSynchronizer, TracingObserver};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "epf-ingest")]
#[command(author, version, about = "Import EPF files into a Postgres database")]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "EPF_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import every file in the ready inbox (default)
    Run,

    /// Parse a single file and report what would be imported
    Check {
        /// EPF file to inspect
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Configuration problems are reported before logging exists
    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        },
    };

    let mut log_config = config.logging.clone().with_env_overrides()?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    if config.db_info.log_sql_statements {
        log_config.add_directive(SQL_LOG_DIRECTIVE);
    }
    let _guard = init_logging(&log_config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Check { file } => check(&config, &file),
    }
}

async fn run(config: AppConfig) -> Result<()> {
    config
        .ensure_inboxes()
        .context("Failed to create inbox directories")?;

    let pool = create_pool(&config.db_info).await?;
    let sink = TableSynchronizer::new(
        pool,
        config.processing.insert_batch_size,
        config.processing.upload_timeout(),
    );

    info!(inbox = %config.inboxes.ready_path.display(), "Starting import");
    let pipeline = IngestionPipeline::new(config, Arc::new(sink), Arc::new(TracingObserver));
    let report = pipeline.run().await?;

    if !report.is_empty() {
        info!(rows = report.rows_imported, "Import complete");
    }
    Ok(())
}

fn check(config: &AppConfig, file: &std::path::Path) -> Result<()> {
    let result = check_file(file, &config.file_structure)
        .with_context(|| format!("Check failed for {}", file.display()))?;

    let metadata = &result.metadata;
    println!("File:         {}", result.filename);
    println!("Export mode:  {}", metadata.export_mode);
    println!("Primary key:  {}", metadata.primary_keys.join(", "));
    println!("Columns:");
    for column in &metadata.column_types {
        println!("  {:<30} {}", column.name, column.ty.sql());
    }
    println!(
        "Rows:         {} kept, {} incomplete, {} malformed, {} comments",
        result.stats.rows_kept,
        result.stats.incomplete_rows,
        result.stats.malformed_rows,
        result.stats.comment_lines
    );
    Ok(())
}
