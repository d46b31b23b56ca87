//! Configuration management
//!
//! The importer is driven by a single YAML file. A missing file is replaced
//! with a template and treated as fatal: the operator has to supply database
//! credentials before anything can be imported.

use epf_common::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IngestError, Result};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Default Postgres port.
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Default maximum database connections in the pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default separator between fields (U+0001, "start of heading").
pub const DEFAULT_FIELD_DELIMITER: char = '\u{1}';

/// Default terminator of each row (U+0002, "start of text").
pub const DEFAULT_ROW_DELIMITER: char = '\u{2}';

/// Default prefix of header and comment lines.
pub const DEFAULT_COMMENT_CHAR: char = '#';

/// Default limit on one file's database work, in seconds.
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 600;

/// Default number of rows per INSERT statement.
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 1000;

const MISSING_CREDENTIALS: &str =
    "Please fill the required database credentials (db_info) into the configuration file";

/// Top-level importer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub db_info: DbInfo,

    #[serde(default)]
    pub file_structure: FileStructure,

    pub inboxes: Inboxes,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbInfo {
    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    #[serde(default)]
    pub db_password: String,
    /// Echo every SQL statement to the log
    #[serde(default)]
    pub log_sql_statements: bool,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Layout of the EPF files in the inbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStructure {
    pub field_delimiter: char,
    pub row_delimiter: char,
    pub comment_char: char,
    /// Field values treated like an empty field when cleaning rows
    pub null_values: Vec<String>,
}

impl Default for FileStructure {
    fn default() -> Self {
        Self {
            field_delimiter: DEFAULT_FIELD_DELIMITER,
            row_delimiter: DEFAULT_ROW_DELIMITER,
            comment_char: DEFAULT_COMMENT_CHAR,
            null_values: Vec::new(),
        }
    }
}

impl FileStructure {
    /// The two-character sequence ending every stored line
    pub fn line_terminator(&self) -> String {
        format!("{}\n", self.row_delimiter)
    }

    /// Delimiters must be distinct single-byte characters for the CSV reader
    pub fn validate(&self) -> Result<()> {
        for (name, c) in [
            ("field_delimiter", self.field_delimiter),
            ("row_delimiter", self.row_delimiter),
            ("comment_char", self.comment_char),
        ] {
            if !c.is_ascii() {
                return Err(IngestError::config(format!(
                    "file_structure.{} must be a single ASCII character, got {:?}",
                    name, c
                )));
            }
        }

        if self.field_delimiter == self.row_delimiter
            || self.field_delimiter == self.comment_char
            || self.row_delimiter == self.comment_char
        {
            return Err(IngestError::config(
                "file_structure delimiters and comment_char must all differ",
            ));
        }

        Ok(())
    }
}

/// Inbox directories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inboxes {
    pub ready_path: PathBuf,
    pub finished_path: PathBuf,
    pub failed_path: PathBuf,
}

impl Default for Inboxes {
    fn default() -> Self {
        Self {
            ready_path: PathBuf::from("inbox/ready"),
            finished_path: PathBuf::from("inbox/finished"),
            failed_path: PathBuf::from("inbox/failed"),
        }
    }
}

/// Batch behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub upload_timeout_secs: u64,
    /// Files processed concurrently; 1 keeps the batch strictly sequential
    pub max_parallel_files: usize,
    pub insert_batch_size: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            upload_timeout_secs: DEFAULT_UPLOAD_TIMEOUT_SECS,
            max_parallel_files: 1,
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
        }
    }
}

impl ProcessingConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

fn default_db_port() -> u16 {
    DEFAULT_DB_PORT
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl AppConfig {
    /// Template written when no configuration file exists
    pub fn template() -> Self {
        Self {
            db_info: DbInfo {
                db_host: String::new(),
                db_port: DEFAULT_DB_PORT,
                db_name: String::new(),
                db_user: String::new(),
                db_password: String::new(),
                log_sql_statements: false,
                max_connections: DEFAULT_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            },
            file_structure: FileStructure::default(),
            inboxes: Inboxes::default(),
            processing: ProcessingConfig::default(),
            logging: LogConfig::builder().log_file_prefix("epf-ingest").build(),
        }
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration file, writing a template if it is missing
    ///
    /// A missing file is always an error, even after the template has been
    /// written, since the template carries no credentials.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            Self::write_default(path)?;
            return Err(IngestError::config(format!(
                "The required configuration file '{}' was not found. A template has been created; {}.",
                path.display(),
                MISSING_CREDENTIALS
            )));
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Write the template configuration to `path`
    pub fn write_default(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(&Self::template())?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let db = &self.db_info;
        if db.db_host.trim().is_empty() || db.db_name.trim().is_empty() || db.db_user.trim().is_empty()
        {
            return Err(IngestError::config(format!(
                "db_host, db_name and db_user are required. {}.",
                MISSING_CREDENTIALS
            )));
        }

        if db.max_connections == 0 {
            return Err(IngestError::config("db_info.max_connections must be greater than 0"));
        }

        self.file_structure.validate()?;

        if self.processing.max_parallel_files == 0 {
            return Err(IngestError::config(
                "processing.max_parallel_files must be greater than 0",
            ));
        }

        if self.processing.insert_batch_size == 0 {
            return Err(IngestError::config(
                "processing.insert_batch_size must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Create the inbox directories if they do not exist
    pub fn ensure_inboxes(&self) -> Result<()> {
        for dir in [
            &self.inboxes.ready_path,
            &self.inboxes.finished_path,
            &self.inboxes.failed_path,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
db_info:
  db_host: localhost
  db_name: itunes
  db_user: loader
  db_password: secret
inboxes:
  ready_path: /data/ready
  finished_path: /data/finished
  failed_path: /data/failed
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.db_info.db_port, 5432);
        assert!(!config.db_info.log_sql_statements);
        assert_eq!(config.file_structure.field_delimiter, '\u{1}');
        assert_eq!(config.file_structure.row_delimiter, '\u{2}');
        assert_eq!(config.file_structure.comment_char, '#');
        assert_eq!(config.processing.max_parallel_files, 1);
        assert_eq!(config.processing.insert_batch_size, 1000);
        assert_eq!(config.inboxes.failed_path, PathBuf::from("/data/failed"));
    }

    #[test]
    fn test_custom_file_structure() {
        let yaml = format!(
            "{}file_structure:\n  field_delimiter: \"|\"\n  row_delimiter: \";\"\n  comment_char: \"%\"\n",
            MINIMAL
        );
        let config = AppConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.file_structure.field_delimiter, '|');
        assert_eq!(config.file_structure.line_terminator(), ";\n");
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let yaml = MINIMAL.replace("db_user: loader", "db_user: \"\"");
        let err = AppConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("database credentials"));
    }

    #[test]
    fn test_clashing_delimiters_rejected() {
        let fs = FileStructure {
            field_delimiter: '#',
            ..FileStructure::default()
        };
        assert!(fs.validate().is_err());

        let fs = FileStructure {
            row_delimiter: 'é',
            ..FileStructure::default()
        };
        assert!(fs.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_writes_template() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
        assert!(path.exists());

        // The template parses but is rejected until credentials are filled in
        let content = std::fs::read_to_string(&path).unwrap();
        let template: AppConfig = serde_yaml::from_str(&content).unwrap();
        assert_eq!(template.file_structure, FileStructure::default());
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_ensure_inboxes_creates_directories() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::from_yaml(MINIMAL).unwrap();
        config.inboxes = Inboxes {
            ready_path: dir.path().join("ready"),
            finished_path: dir.path().join("done/finished"),
            failed_path: dir.path().join("failed"),
        };
        config.ensure_inboxes().unwrap();
        assert!(dir.path().join("done/finished").is_dir());
    }
}
