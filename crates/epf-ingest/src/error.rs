//! Error types for the EPF importer
//!
//! Every failure a file can hit on its way from the ready inbox to the
//! database has its own variant, so the pipeline can pick a disposition
//! message without inspecting strings.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::metadata::HeaderProblem;

/// Result type alias for importer operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Statement intent that failed during an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Connect,
    Drop,
    Create,
    Insert,
    PrimaryKey,
    Update,
    MergeInsert,
    Commit,
}

impl UploadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStage::Connect => "connect",
            UploadStage::Drop => "drop",
            UploadStage::Create => "create",
            UploadStage::Insert => "insert",
            UploadStage::PrimaryKey => "primary_key",
            UploadStage::Update => "update",
            UploadStage::MergeInsert => "merge_insert",
            UploadStage::Commit => "commit",
        }
    }
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the importer
#[derive(Error, Debug)]
pub enum IngestError {
    /// The 4-line metadata header failed one or more structural checks
    #[error("Malformed header in '{file}': {}", join_problems(.problems))]
    MalformedHeader {
        file: String,
        problems: Vec<HeaderProblem>,
    },

    /// A dbTypes descriptor names a type with no database counterpart
    #[error("Unknown column type '{descriptor}' for column '{column}' in '{file}'")]
    UnknownType {
        file: String,
        column: String,
        descriptor: String,
    },

    /// The data rows could not be tokenized at all
    #[error("Failed to parse body of '{file}': {message}")]
    BodyParse { file: String, message: String },

    /// A database statement failed
    #[error("Upload of table '{table}' failed during {stage}: {source}")]
    Upload {
        table: String,
        stage: UploadStage,
        #[source]
        source: sqlx::Error,
    },

    /// The upload did not finish within the configured limit
    #[error("Upload of table '{table}' timed out after {seconds}s")]
    UploadTimeout { table: String, seconds: u64 },

    /// The target table name cannot be used as a database identifier
    #[error("Invalid table name '{table}': {reason}")]
    InvalidTableName { table: String, reason: String },

    /// A file could not be relocated after processing
    #[error("Failed to move '{file}' to {}: {source}", .destination.display())]
    Move {
        file: String,
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task died before producing a result
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_problems(problems: &[HeaderProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("task failed: {}", err))
    }
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn body_parse(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BodyParse {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn upload(table: impl Into<String>, stage: UploadStage, source: sqlx::Error) -> Self {
        Self::Upload {
            table: table.into(),
            stage,
            source,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_header_lists_every_problem() {
        let err = IngestError::MalformedHeader {
            file: "artist".to_string(),
            problems: vec![
                HeaderProblem::MissingCommentChar { line: 2 },
                HeaderProblem::TypeCountMismatch {
                    columns: 3,
                    types: 2,
                },
            ],
        };
        let message = err.to_string();
        assert!(message.starts_with("Malformed header in 'artist'"));
        assert!(message.contains("line 2"));
        assert!(message.contains("3 columns but 2 dbTypes"));
    }

    #[test]
    fn test_upload_error_names_stage() {
        let err = IngestError::upload("artist", UploadStage::MergeInsert, sqlx::Error::PoolTimedOut);
        assert!(err.to_string().contains("during merge_insert"));
    }
}
