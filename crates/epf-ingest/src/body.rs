//! Data row parsing and cleaning
//!
//! Rows are tokenized with the `csv` crate. The stored terminator is
//! `row_delimiter` followed by a newline, which the reader cannot express, so
//! the pair is collapsed to the bare `row_delimiter` first. The header block
//! is skipped by position; later lines starting with the comment character
//! are skipped as comments.

use crate::config::FileStructure;
use crate::error::{IngestError, Result};
use crate::metadata::HEADER_LINES;

/// Cleaned rows of one file, keyed by the header's column order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// What happened to the records of one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyStats {
    pub records_read: usize,
    pub comment_lines: usize,
    /// Skipped for having the wrong number of fields
    pub malformed_rows: usize,
    /// Dropped for containing an empty or null field
    pub incomplete_rows: usize,
    pub rows_kept: usize,
}

/// Tokenize and clean the data rows of `content`
///
/// `file` is only used to label errors.
pub fn parse_body(
    file: &str,
    content: &str,
    columns: &[String],
    structure: &FileStructure,
) -> Result<(TableData, BodyStats)> {
    let collapsed = content.replace(
        &structure.line_terminator(),
        &structure.row_delimiter.to_string(),
    );

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .delimiter(ascii_byte(structure.field_delimiter, file)?)
        .terminator(csv::Terminator::Any(ascii_byte(structure.row_delimiter, file)?))
        .from_reader(skip_header(&collapsed, structure.row_delimiter).as_bytes());

    let mut stats = BodyStats::default();
    let mut rows = Vec::new();

    for record in reader.records() {
        let record = record.map_err(|e| IngestError::body_parse(file, e.to_string()))?;

        if record
            .get(0)
            .is_some_and(|first| first.starts_with(structure.comment_char))
        {
            stats.comment_lines += 1;
            continue;
        }
        stats.records_read += 1;

        if record.len() != columns.len() {
            stats.malformed_rows += 1;
            continue;
        }

        if record.iter().any(|field| is_null(field, structure)) {
            stats.incomplete_rows += 1;
            continue;
        }

        rows.push(record.iter().map(str::to_string).collect());
    }

    stats.rows_kept = rows.len();

    tracing::debug!(
        file = %file,
        records = stats.records_read,
        malformed = stats.malformed_rows,
        incomplete = stats.incomplete_rows,
        kept = stats.rows_kept,
        "Parsed file body"
    );

    Ok((
        TableData {
            columns: columns.to_vec(),
            rows,
        },
        stats,
    ))
}

/// Remainder of `content` after the metadata lines
fn skip_header(content: &str, row_delimiter: char) -> &str {
    let mut rest = content;
    for _ in 0..HEADER_LINES {
        match rest.find(row_delimiter) {
            Some(end) => rest = &rest[end + row_delimiter.len_utf8()..],
            None => return "",
        }
    }
    rest
}

fn ascii_byte(c: char, file: &str) -> Result<u8> {
    u8::try_from(c)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| IngestError::body_parse(file, format!("delimiter {:?} is not ASCII", c)))
}

fn is_null(field: &str, structure: &FileStructure) -> bool {
    field.is_empty() || structure.null_values.iter().any(|null| null == field)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const HEADER: &str = "#id\u{1}name\u{2}\n#primaryKey:id\u{2}\n#dbTypes:INT\u{1}TEXT\u{2}\n#exportMode:FULL\u{2}\n";

    fn columns() -> Vec<String> {
        vec!["id".to_string(), "name".to_string()]
    }

    fn file(rows: &[&str]) -> String {
        let mut content = HEADER.to_string();
        for row in rows {
            content.push_str(row);
            content.push_str("\u{2}\n");
        }
        content
    }

    #[test]
    fn test_parses_rows_after_header() {
        let content = file(&["1\u{1}Radiohead", "2\u{1}Björk"]);
        let (data, stats) = parse_body("artist", &content, &columns(), &FileStructure::default()).unwrap();

        assert_eq!(data.columns, columns());
        assert_eq!(
            data.rows,
            vec![vec!["1", "Radiohead"], vec!["2", "Björk"]]
        );
        assert_eq!(stats.records_read, 2);
        assert_eq!(stats.rows_kept, 2);
    }

    #[test]
    fn test_embedded_newlines_and_quotes_are_data() {
        let content = file(&["1\u{1}line one\nline two", "2\u{1}\"quoted\""]);
        let (data, _) = parse_body("t", &content, &columns(), &FileStructure::default()).unwrap();
        assert_eq!(data.rows[0][1], "line one\nline two");
        assert_eq!(data.rows[1][1], "\"quoted\"");
    }

    #[test]
    fn test_wrong_field_count_skipped() {
        let content = file(&["1\u{1}a", "2", "3\u{1}c\u{1}extra", "4\u{1}d"]);
        let (data, stats) = parse_body("t", &content, &columns(), &FileStructure::default()).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(stats.malformed_rows, 2);
    }

    #[test]
    fn test_empty_and_null_fields_dropped() {
        let structure = FileStructure {
            null_values: vec!["NULL".to_string()],
            ..FileStructure::default()
        };
        let content = file(&["1\u{1}", "\u{1}b", "3\u{1}NULL", "4\u{1}d"]);
        let (data, stats) = parse_body("t", &content, &columns(), &structure).unwrap();
        assert_eq!(data.rows, vec![vec!["4", "d"]]);
        assert_eq!(stats.incomplete_rows, 3);
    }

    #[test]
    fn test_comment_lines_in_body_ignored() {
        let content = file(&["1\u{1}a", "#recordsWritten:1", "2\u{1}b"]);
        let (data, stats) = parse_body("t", &content, &columns(), &FileStructure::default()).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(stats.comment_lines, 1);
        assert_eq!(stats.records_read, 2);
    }

    #[test]
    fn test_header_only_file_is_empty() {
        let (data, stats) = parse_body("t", HEADER, &columns(), &FileStructure::default()).unwrap();
        assert!(data.is_empty());
        assert_eq!(stats.rows_kept, 0);
    }

    #[test]
    fn test_custom_delimiters() {
        let structure = FileStructure {
            field_delimiter: '|',
            row_delimiter: ';',
            comment_char: '%',
            null_values: Vec::new(),
        };
        let content = "%id|name;\n%primaryKey:id;\n%dbTypes:INT|TEXT;\n%exportMode:FULL;\n1|a;\n2|b;\n";
        let (data, _) = parse_body("t", content, &columns(), &structure).unwrap();
        assert_eq!(data.rows, vec![vec!["1", "a"], vec!["2", "b"]]);
    }
}
