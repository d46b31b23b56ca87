//! Batch orchestration
//!
//! Every file found in the ready inbox goes through the same steps: header,
//! body, upload, disposition. Each step can fail independently; a failure
//! ends that file's run and sends it to the failed inbox, but never stops the
//! rest of the batch.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::body::BodyStats;
use crate::config::{AppConfig, FileStructure};
use crate::error::{IngestError, Result};
use crate::inbox::{discover, DiscoveredFile, FileMover};
use crate::metadata::FileMetadata;
use crate::observer::PipelineObserver;
use crate::record::FileRecord;
use crate::sync::TableSink;

/// Furthest point a file reached before it was dispositioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileStage {
    Discovered,
    MetadataParsed,
    BodyParsed,
    Uploaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Finished,
    Failed,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Finished => f.write_str("finished"),
            Disposition::Failed => f.write_str("failed"),
        }
    }
}

/// Why a file ended up in the failed inbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    MalformedHeader,
    UnknownType,
    BodyParse,
    NoRecords,
    Upload,
    Unexpected,
}

impl FailureReason {
    pub fn from_error(err: &IngestError) -> Self {
        match err {
            IngestError::MalformedHeader { .. } => FailureReason::MalformedHeader,
            IngestError::UnknownType { .. } => FailureReason::UnknownType,
            IngestError::BodyParse { .. } => FailureReason::BodyParse,
            IngestError::Upload { .. }
            | IngestError::UploadTimeout { .. }
            | IngestError::InvalidTableName { .. } => FailureReason::Upload,
            _ => FailureReason::Unexpected,
        }
    }

    /// Message logged when the file is moved to the failed inbox
    pub fn message(&self, path: &Path) -> String {
        match self {
            FailureReason::MalformedHeader => "Malformed file header.".to_string(),
            FailureReason::UnknownType => "Unsupported column type in file header.".to_string(),
            FailureReason::BodyParse => format!("Failed to parse records in {}.", path.display()),
            FailureReason::NoRecords => {
                format!("No records were found in {} to import.", path.display())
            },
            FailureReason::Upload => format!(
                "Failed to import records from {} into database.",
                path.display()
            ),
            FailureReason::Unexpected => "Unhandled exception".to_string(),
        }
    }
}

/// What happened to one discovered file
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub filename: String,
    pub source_path: PathBuf,
    pub stage_reached: FileStage,
    pub disposition: Disposition,
    pub failure: Option<FailureReason>,
    pub rows_imported: u64,
    /// Final location, `None` if the move failed and the file was left in place
    pub moved_to: Option<PathBuf>,
}

/// Result of one run over the ready inbox
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Ordered by source path
    pub outcomes: Vec<FileOutcome>,
    pub rows_imported: u64,
    pub duration: Duration,
}

impl BatchReport {
    pub fn count(&self, disposition: Disposition) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.disposition == disposition)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

pub struct IngestionPipeline {
    config: AppConfig,
    sink: Arc<dyn TableSink>,
    observer: Arc<dyn PipelineObserver>,
    mover: FileMover,
    table_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IngestionPipeline {
    pub fn new(
        config: AppConfig,
        sink: Arc<dyn TableSink>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            config,
            sink,
            observer,
            mover: FileMover::new(),
            table_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Import every file currently in the ready inbox
    pub async fn run(&self) -> Result<BatchReport> {
        let start = Instant::now();
        let files = discover(&self.config.inboxes.ready_path)?;
        let concurrency = self.config.processing.max_parallel_files.max(1);

        debug!(files = files.len(), concurrency, "Starting import batch");

        let mut outcomes: Vec<FileOutcome> = stream::iter(files)
            .map(|file| self.process_file(file))
            .buffer_unordered(concurrency)
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.source_path.cmp(&b.source_path));

        let rows_imported = outcomes.iter().map(|o| o.rows_imported).sum();
        let report = BatchReport {
            outcomes,
            rows_imported,
            duration: start.elapsed(),
        };

        self.observer.batch_finished(&report);
        Ok(report)
    }

    /// Take one file through parsing, upload and disposition
    pub async fn process_file(&self, file: DiscoveredFile) -> FileOutcome {
        self.observer.file_discovered(&file);

        let mut stage = FileStage::Discovered;
        let result = self.import(&file, &mut stage).await;

        let (disposition, failure, rows_imported, message, destination) = match result {
            Ok(rows) => (
                Disposition::Finished,
                None,
                rows,
                format!(
                    "Successfully imported {} records from {} into database.",
                    rows,
                    file.path.display()
                ),
                &self.config.inboxes.finished_path,
            ),
            Err(reason) => (
                Disposition::Failed,
                Some(reason),
                0,
                reason.message(&file.path),
                &self.config.inboxes.failed_path,
            ),
        };

        let moved_to = self
            .mover
            .relocate(&file.filename, &file.path, destination, &message)
            .await;

        let outcome = FileOutcome {
            filename: file.filename,
            source_path: file.path,
            stage_reached: stage,
            disposition,
            failure,
            rows_imported,
            moved_to,
        };
        self.observer.file_disposed(&outcome);
        outcome
    }

    async fn import(
        &self,
        file: &DiscoveredFile,
        stage: &mut FileStage,
    ) -> std::result::Result<u64, FailureReason> {
        let record = match self.parse(file, stage).await {
            Ok(record) => record,
            Err(e) => {
                self.observer.parse_failed(file, &e);
                return Err(FailureReason::from_error(&e));
            },
        };

        if record.row_count() == 0 {
            return Err(FailureReason::NoRecords);
        }

        let lock = self.table_lock(record.table_name()).await;
        let _guard = lock.lock().await;

        self.observer.upload_started(&record);
        match self.sink.synchronize(&record).await {
            Ok(rows) => {
                *stage = FileStage::Uploaded;
                Ok(rows)
            },
            Err(e) => {
                self.observer.upload_failed(&record, &e);
                Err(FailureReason::from_error(&e))
            },
        }
    }

    async fn parse(&self, file: &DiscoveredFile, stage: &mut FileStage) -> Result<FileRecord> {
        let structure = self.config.file_structure.clone();
        let filename = file.filename.clone();
        let path = file.path.clone();
        let record = blocking(move || FileRecord::open(filename, &path, &structure)).await?;
        *stage = FileStage::MetadataParsed;

        let structure = self.config.file_structure.clone();
        let record = blocking(move || {
            let mut record = record;
            record.load_body(&structure)?;
            Ok(record)
        })
        .await?;
        *stage = FileStage::BodyParsed;

        Ok(record)
    }

    async fn table_lock(&self, table: &str) -> Arc<Mutex<()>> {
        let mut locks = self.table_locks.lock().await;
        locks.entry(table.to_string()).or_default().clone()
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Parse summary of a single file, without touching the database
#[derive(Debug, Clone)]
pub struct FileCheck {
    pub filename: String,
    pub metadata: FileMetadata,
    pub stats: BodyStats,
}

/// Parse the header and body of `path` and report what an import would see
pub fn check_file(path: &Path, structure: &FileStructure) -> Result<FileCheck> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::config(format!("'{}' is not a file path", path.display())))?
        .to_string();

    let mut record = FileRecord::open(filename.clone(), path, structure)?;
    let stats = record.load_body(structure)?;

    Ok(FileCheck {
        filename,
        metadata: record.metadata,
        stats,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::metadata::HeaderProblem;
    use sqlx::Error as SqlxError;

    #[test]
    fn test_failure_reason_from_error() {
        let header = IngestError::MalformedHeader {
            file: "t".to_string(),
            problems: vec![HeaderProblem::TooFewLines { found: 1 }],
        };
        assert_eq!(FailureReason::from_error(&header), FailureReason::MalformedHeader);

        let upload = IngestError::upload("t", crate::error::UploadStage::Insert, SqlxError::PoolClosed);
        assert_eq!(FailureReason::from_error(&upload), FailureReason::Upload);

        let timeout = IngestError::UploadTimeout {
            table: "t".to_string(),
            seconds: 1,
        };
        assert_eq!(FailureReason::from_error(&timeout), FailureReason::Upload);

        let internal = IngestError::Internal("boom".to_string());
        assert_eq!(FailureReason::from_error(&internal), FailureReason::Unexpected);
    }

    #[test]
    fn test_failure_messages() {
        let path = Path::new("/inbox/ready/artist");
        assert_eq!(
            FailureReason::MalformedHeader.message(path),
            "Malformed file header."
        );
        assert_eq!(
            FailureReason::NoRecords.message(path),
            "No records were found in /inbox/ready/artist to import."
        );
        assert_eq!(FailureReason::Unexpected.message(path), "Unhandled exception");
    }

    #[test]
    fn test_check_file_reports_metadata_and_stats() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("genre");
        std::fs::write(
            &path,
            "#genre_id\u{1}name\u{2}\n#primaryKey:genre_id\u{2}\n#dbTypes:INTEGER\u{1}VARCHAR(100)\u{2}\n#exportMode:INCREMENTAL\u{2}\n1\u{1}Rock\u{2}\n2\u{1}\u{2}\n",
        )
        .unwrap();

        let check = check_file(&path, &FileStructure::default()).unwrap();
        assert_eq!(check.filename, "genre");
        assert!(!check.metadata.export_mode.is_full());
        assert_eq!(check.stats.rows_kept, 1);
        assert_eq!(check.stats.incomplete_rows, 1);
        assert!(path.exists());
    }
}
