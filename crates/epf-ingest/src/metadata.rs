//! EPF header parsing and validation
//!
//! Every EPF file opens with four comment lines:
//!
//! ```text
//! #<col1><FS><col2>...
//! #primaryKey:<key1><FS><key2>...
//! #dbTypes:<type1><FS><type2>...
//! #exportMode:<mode>
//! ```
//!
//! where `<FS>` is the configured field delimiter and each line is stored
//! with `row_delimiter` followed by a newline. All structural checks run
//! before the parser gives up, so a rejected header reports every problem
//! at once.

use std::fmt;
use std::io::BufRead;

use crate::config::FileStructure;
use crate::error::{IngestError, Result};
use crate::types::ColumnType;

/// Number of metadata lines at the top of every file
pub const HEADER_LINES: usize = 4;

/// Labelled header lines, in file order after the column line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLabel {
    PrimaryKey,
    DbTypes,
    ExportMode,
}

impl HeaderLabel {
    /// Keyword that must appear (case-insensitively) before the `:`
    pub fn keyword(&self) -> &'static str {
        match self {
            HeaderLabel::PrimaryKey => "primaryKey",
            HeaderLabel::DbTypes => "dbTypes",
            HeaderLabel::ExportMode => "exportMode",
        }
    }

    /// Zero-based line number of this label in the header block
    pub fn line(&self) -> usize {
        match self {
            HeaderLabel::PrimaryKey => 1,
            HeaderLabel::DbTypes => 2,
            HeaderLabel::ExportMode => 3,
        }
    }
}

impl fmt::Display for HeaderLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One failed header check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderProblem {
    TooFewLines { found: usize },
    InvalidEncoding { line: usize },
    MissingCommentChar { line: usize },
    /// Label line without exactly one `:` separator
    MalformedLabel { label: HeaderLabel, separators: usize },
    WrongLabel { label: HeaderLabel, found: String },
    TypeCountMismatch { columns: usize, types: usize },
    EmptyColumnName { position: usize },
    DuplicateColumn { name: String },
    UnknownPrimaryKey { name: String },
}

impl fmt::Display for HeaderProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderProblem::TooFewLines { found } => {
                write!(f, "expected {} header lines, found {}", HEADER_LINES, found)
            },
            HeaderProblem::InvalidEncoding { line } => {
                write!(f, "line {} is not valid UTF-8", line)
            },
            HeaderProblem::MissingCommentChar { line } => {
                write!(f, "line {} does not start with the comment character", line)
            },
            HeaderProblem::MalformedLabel { label, separators } => write!(
                f,
                "{} row (line {}) must contain exactly one ':' but has {}",
                label,
                label.line(),
                separators
            ),
            HeaderProblem::WrongLabel { label, found } => write!(
                f,
                "line {} should be labelled {} but is labelled '{}'",
                label.line(),
                label,
                found
            ),
            HeaderProblem::TypeCountMismatch { columns, types } => {
                write!(f, "{} columns but {} dbTypes", columns, types)
            },
            HeaderProblem::EmptyColumnName { position } => {
                write!(f, "column {} has an empty name", position)
            },
            HeaderProblem::DuplicateColumn { name } => write!(f, "column '{}' appears twice", name),
            HeaderProblem::UnknownPrimaryKey { name } => {
                write!(f, "primary key '{}' is not one of the columns", name)
            },
        }
    }
}

/// How a file's rows are applied to its table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportMode {
    /// Replace the whole table
    Full,
    /// Merge into the existing table; carries the uppercased marker
    Incremental(String),
}

impl ExportMode {
    /// Normalize a raw header value; anything other than FULL is incremental
    pub fn parse(raw: &str) -> Self {
        let mode = raw.trim().to_uppercase();
        if mode == "FULL" {
            ExportMode::Full
        } else {
            ExportMode::Incremental(mode)
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, ExportMode::Full)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ExportMode::Full => "FULL",
            ExportMode::Incremental(marker) => marker,
        }
    }
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A column with its resolved database type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
}

/// Validated header of one EPF file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub column_headers: Vec<String>,
    pub primary_keys: Vec<String>,
    /// One entry per column, in column order
    pub column_types: Vec<ColumnSpec>,
    pub export_mode: ExportMode,
}

impl FileMetadata {
    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_keys.iter().any(|pk| pk == column)
    }

    /// Columns outside the primary key, in column order
    pub fn non_key_columns(&self) -> impl Iterator<Item = &str> {
        self.column_headers
            .iter()
            .map(String::as_str)
            .filter(|c| !self.is_primary_key(c))
    }
}

/// Read the raw header lines of `filename`, stripping each line's terminator
///
/// Stops early at end of input, so fewer than [`HEADER_LINES`] lines can be
/// returned; the parser reports that as a malformed header. A line that is
/// not valid UTF-8 is reported here as a malformed header.
pub fn read_header_lines<R: BufRead>(
    filename: &str,
    mut reader: R,
    structure: &FileStructure,
) -> Result<Vec<String>> {
    let terminator = structure.line_terminator();
    let mut lines = Vec::with_capacity(HEADER_LINES);

    for index in 0..HEADER_LINES {
        let mut bytes = Vec::new();
        if reader.read_until(b'\n', &mut bytes)? == 0 {
            break;
        }
        let line = String::from_utf8(bytes).map_err(|_| IngestError::MalformedHeader {
            file: filename.to_string(),
            problems: vec![HeaderProblem::InvalidEncoding { line: index }],
        })?;

        let mut line = line.replace(&terminator, "");
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        if line.ends_with(structure.row_delimiter) {
            line.pop();
        }
        lines.push(line);
    }

    Ok(lines)
}

/// Parses the header block of an EPF file into [`FileMetadata`]
#[derive(Debug, Clone)]
pub struct MetadataParser {
    structure: FileStructure,
}

impl MetadataParser {
    pub fn new(structure: FileStructure) -> Self {
        Self { structure }
    }

    /// Validate the header lines of `filename` and resolve its column types
    ///
    /// Structural problems are collected and returned together as
    /// [`IngestError::MalformedHeader`]; type resolution only runs on a
    /// structurally valid header.
    pub fn parse<S: AsRef<str>>(&self, filename: &str, lines: &[S]) -> Result<FileMetadata> {
        let malformed = |problems| IngestError::MalformedHeader {
            file: filename.to_string(),
            problems,
        };

        if lines.len() < HEADER_LINES {
            return Err(malformed(vec![HeaderProblem::TooFewLines { found: lines.len() }]));
        }

        let head: Vec<&str> = lines[..HEADER_LINES].iter().map(AsRef::as_ref).collect();
        let comment = self.structure.comment_char;
        let mut problems = Vec::new();

        for (line, text) in head.iter().enumerate() {
            if !text.starts_with(comment) {
                problems.push(HeaderProblem::MissingCommentChar { line });
            }
        }

        let column_headers = self.split_fields(head[0].trim_matches(comment));
        let raw_types = self
            .label_value(head[HeaderLabel::DbTypes.line()], HeaderLabel::DbTypes, &mut problems)
            .map(|value| self.split_fields(value));
        let primary_keys = self
            .label_value(
                head[HeaderLabel::PrimaryKey.line()],
                HeaderLabel::PrimaryKey,
                &mut problems,
            )
            .map(|value| self.split_fields(value));
        let export_mode = self
            .label_value(
                head[HeaderLabel::ExportMode.line()],
                HeaderLabel::ExportMode,
                &mut problems,
            )
            .map(ExportMode::parse);

        check_columns(&column_headers, &mut problems);

        if let Some(ref types) = raw_types {
            if types.len() != column_headers.len() {
                problems.push(HeaderProblem::TypeCountMismatch {
                    columns: column_headers.len(),
                    types: types.len(),
                });
            }
        }

        if let Some(ref keys) = primary_keys {
            for key in keys {
                if !column_headers.contains(key) {
                    problems.push(HeaderProblem::UnknownPrimaryKey { name: key.clone() });
                }
            }
        }

        let (Some(raw_types), Some(primary_keys), Some(export_mode)) =
            (raw_types, primary_keys, export_mode)
        else {
            return Err(malformed(problems));
        };
        if !problems.is_empty() {
            return Err(malformed(problems));
        }

        let column_types = column_headers
            .iter()
            .zip(&raw_types)
            .map(|(column, descriptor)| {
                ColumnType::parse(descriptor)
                    .map(|ty| ColumnSpec {
                        name: column.clone(),
                        ty,
                    })
                    .ok_or_else(|| IngestError::UnknownType {
                        file: filename.to_string(),
                        column: column.clone(),
                        descriptor: descriptor.clone(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(FileMetadata {
            column_headers,
            primary_keys,
            column_types,
            export_mode,
        })
    }

    fn split_fields(&self, value: &str) -> Vec<String> {
        value
            .split(self.structure.field_delimiter)
            .map(str::to_string)
            .collect()
    }

    /// Value after the `:` of a label line, or `None` after recording why not
    fn label_value<'a>(
        &self,
        row: &'a str,
        label: HeaderLabel,
        problems: &mut Vec<HeaderProblem>,
    ) -> Option<&'a str> {
        let parts: Vec<&str> = row.split(':').collect();
        if parts.len() != 2 {
            problems.push(HeaderProblem::MalformedLabel {
                label,
                separators: parts.len() - 1,
            });
            return None;
        }

        let found = parts[0].trim_start_matches(self.structure.comment_char);
        if !found
            .to_lowercase()
            .contains(&label.keyword().to_lowercase())
        {
            problems.push(HeaderProblem::WrongLabel {
                label,
                found: found.to_string(),
            });
            return None;
        }

        Some(parts[1])
    }
}

fn check_columns(columns: &[String], problems: &mut Vec<HeaderProblem>) {
    for (position, name) in columns.iter().enumerate() {
        if name.is_empty() {
            problems.push(HeaderProblem::EmptyColumnName { position });
        } else if columns[..position].contains(name) {
            problems.push(HeaderProblem::DuplicateColumn { name: name.clone() });
        }
    }
}
