//! EPF Ingest Library
//!
//! Imports EPF flat files (the delimited exports of the iTunes catalogue
//! feed) from an inbox directory into Postgres tables.
//!
//! # Overview
//!
//! Each file in the ready inbox maps to one table named after the file:
//!
//! - **Header**: four comment lines carrying column names, primary key,
//!   column types and export mode ([`metadata`])
//! - **Body**: delimited rows, cleaned of incomplete records ([`body`])
//! - **Upload**: FULL files replace their table; incremental files are merged
//!   through a staging table ([`sync`])
//! - **Disposition**: the file moves to the finished or failed inbox with a
//!   timestamp suffix ([`inbox`])
//!
//! # Example
//!
//! ```no_run
//! use epf_ingest::{AppConfig, IngestionPipeline, TableSynchronizer, TracingObserver};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load("config.yaml")?;
//!     let pool = epf_ingest::db::create_pool(&config.db_info).await?;
//!     let sink = TableSynchronizer::new(
//!         pool,
//!         config.processing.insert_batch_size,
//!         config.processing.upload_timeout(),
//!     );
//!
//!     let pipeline = IngestionPipeline::new(config, Arc::new(sink), Arc::new(TracingObserver));
//!     let report = pipeline.run().await?;
//!     println!("{} rows imported", report.rows_imported);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod body;
pub mod config;
pub mod db;
pub mod error;
pub mod inbox;
pub mod metadata;
pub mod observer;
pub mod pipeline;
pub mod record;
pub mod sync;
pub mod types;

pub use config::{AppConfig, FileStructure};
pub use error::{IngestError, Result};
pub use metadata::{ExportMode, FileMetadata, MetadataParser};
pub use observer::{NoopObserver, PipelineObserver, TracingObserver};
pub use pipeline::{check_file, BatchReport, Disposition, FileOutcome, IngestionPipeline};
pub use record::FileRecord;
pub use sync::{TableSink, TableSynchronizer};
