//! Pipeline checkpoints
//!
//! The pipeline reports what happened to each file through a
//! [`PipelineObserver`]; [`TracingObserver`] turns those checkpoints into log
//! events. Tests can plug in their own observer to record the sequence.

use tracing::{error, info, warn};

use crate::error::IngestError;
use crate::inbox::DiscoveredFile;
use crate::pipeline::{BatchReport, Disposition, FileOutcome};
use crate::record::FileRecord;

pub trait PipelineObserver: Send + Sync {
    fn file_discovered(&self, _file: &DiscoveredFile) {}

    /// Header or body could not be parsed
    fn parse_failed(&self, _file: &DiscoveredFile, _error: &IngestError) {}

    fn upload_started(&self, _record: &FileRecord) {}

    fn upload_failed(&self, _record: &FileRecord, _error: &IngestError) {}

    fn file_disposed(&self, _outcome: &FileOutcome) {}

    fn batch_finished(&self, _report: &BatchReport) {}
}

/// Observer that ignores every checkpoint
#[derive(Debug, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Logs each checkpoint through `tracing`
#[derive(Debug, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn file_discovered(&self, file: &DiscoveredFile) {
        info!(file = %file.filename, path = %file.path.display(), "Processing file");
    }

    fn parse_failed(&self, file: &DiscoveredFile, err: &IngestError) {
        match err {
            IngestError::MalformedHeader { problems, .. } => {
                for problem in problems {
                    error!(file = %file.filename, "{}", problem);
                }
            },
            other => error!(file = %file.filename, error = %other, "Failed to parse file"),
        }
    }

    fn upload_started(&self, record: &FileRecord) {
        info!(
            file = %record.filename,
            table = %record.table_name(),
            mode = %record.metadata.export_mode,
            rows = record.row_count(),
            "Uploading records"
        );
    }

    fn upload_failed(&self, record: &FileRecord, err: &IngestError) {
        match err {
            IngestError::Upload { stage, source, .. } => error!(
                file = %record.filename,
                stage = %stage,
                error = %source,
                "Database upload failed"
            ),
            other => error!(file = %record.filename, error = %other, "Database upload failed"),
        }
    }

    fn file_disposed(&self, outcome: &FileOutcome) {
        if outcome.moved_to.is_none() {
            warn!(
                file = %outcome.filename,
                path = %outcome.source_path.display(),
                "File left in place"
            );
        }
    }

    fn batch_finished(&self, report: &BatchReport) {
        if report.outcomes.is_empty() {
            info!("No files found to import");
            return;
        }

        info!(
            files = report.outcomes.len(),
            finished = report.count(Disposition::Finished),
            failed = report.count(Disposition::Failed),
            rows = report.rows_imported,
            duration_secs = report.duration.as_secs_f64(),
            "Import batch complete"
        );
    }
}
