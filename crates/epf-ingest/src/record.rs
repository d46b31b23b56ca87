//! The file entity carried through the pipeline

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::body::{parse_body, BodyStats, TableData};
use crate::config::FileStructure;
use crate::error::{IngestError, Result};
use crate::metadata::{read_header_lines, FileMetadata, MetadataParser};

/// One EPF file: identity, validated header, and (once loaded) its rows
///
/// A `FileRecord` only exists for files whose header passed validation.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub filename: String,
    pub source_path: PathBuf,
    pub metadata: FileMetadata,
    data: TableData,
    stats: Option<BodyStats>,
}

impl FileRecord {
    /// Build a record from header lines that were already read
    pub fn from_header<S: AsRef<str>>(
        filename: impl Into<String>,
        source_path: impl Into<PathBuf>,
        lines: &[S],
        structure: &FileStructure,
    ) -> Result<Self> {
        let filename = filename.into();
        let metadata = MetadataParser::new(structure.clone()).parse(&filename, lines)?;
        Ok(Self {
            filename,
            source_path: source_path.into(),
            metadata,
            data: TableData::default(),
            stats: None,
        })
    }

    /// Read and validate the header of the file at `path`
    pub fn open(filename: impl Into<String>, path: &Path, structure: &FileStructure) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let filename = filename.into();
        let lines = read_header_lines(&filename, reader, structure)?;
        Self::from_header(filename, path, &lines, structure)
    }

    /// Parse the file's data rows from `content` and attach them
    pub fn attach_body(&mut self, content: &str, structure: &FileStructure) -> Result<BodyStats> {
        let (data, stats) =
            parse_body(&self.filename, content, &self.metadata.column_headers, structure)?;
        self.data = data;
        self.stats = Some(stats);
        Ok(stats)
    }

    /// Read the whole file from disk and attach its data rows
    pub fn load_body(&mut self, structure: &FileStructure) -> Result<BodyStats> {
        let bytes = std::fs::read(&self.source_path)?;
        let content = String::from_utf8(bytes).map_err(|e| {
            IngestError::body_parse(&self.filename, format!("file is not valid UTF-8: {}", e))
        })?;
        self.attach_body(&content, structure)
    }

    /// Target table, named after the file
    pub fn table_name(&self) -> &str {
        &self.filename
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.data.rows
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }

    /// Cleaning statistics, present once the body has been loaded
    pub fn body_stats(&self) -> Option<BodyStats> {
        self.stats
    }
}
