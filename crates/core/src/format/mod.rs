//! Decoding of uploaded export files into raw row records.
//!
//! Every supported format yields the same thing: an ordered, single-pass
//! sequence of [`RawRow`]s keyed by the file's own column headers. Nothing is
//! renamed or typed here; that is the job of [`crate::mapper`].

mod delimited;
mod json;
mod xlsx;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Source format
// ---------------------------------------------------------------------------

/// File formats accepted by the upload endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Csv,
    Xlsx,
    Json,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Json => "json",
        }
    }

    /// Parse a declared format name (case-insensitive). Returns `None` for
    /// unknown values.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Infer the format from a file name's extension.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        Self::from_str(ext)
    }

    /// Infer the format from an upload content type.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "text/csv" | "application/csv" => Some(Self::Csv),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some(Self::Xlsx),
            "application/json" | "text/json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Pick the format for an upload: an explicit declaration wins, then the
    /// file extension, then the content type.
    pub fn detect(
        declared: Option<&str>,
        filename: &str,
        content_type: Option<&str>,
    ) -> Result<Self, CoreError> {
        if let Some(declared) = declared.filter(|d| !d.trim().is_empty()) {
            return Self::from_str(declared).ok_or_else(|| unsupported(declared));
        }
        Self::from_filename(filename)
            .or_else(|| content_type.and_then(Self::from_content_type))
            .ok_or_else(|| unsupported(filename))
    }

    /// All valid format values.
    pub const ALL: &'static [&'static str] = &["csv", "xlsx", "json"];
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn unsupported(what: &str) -> CoreError {
    CoreError::UnsupportedFormat(format!(
        "'{what}' is not one of: {}",
        SourceFormat::ALL.join(", ")
    ))
}

pub(crate) fn malformed(msg: impl Into<String>) -> CoreError {
    CoreError::MalformedInput(msg.into())
}

// ---------------------------------------------------------------------------
// Raw rows
// ---------------------------------------------------------------------------

/// One decoded source line: original header text -> raw cell text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 0-based position among the file's data rows.
    pub index: usize,
    pub values: IndexMap<String, String>,
}

impl RawRow {
    pub fn get(&self, header: &str) -> Option<&str> {
        self.values.get(header).map(String::as_str)
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Build a row from a header list and positional cells. Cells beyond the
    /// header are dropped, missing trailing cells are absent, and the first
    /// occurrence of a duplicated header wins.
    pub(crate) fn from_cells<'c>(
        index: usize,
        headers: &[String],
        cells: impl IntoIterator<Item = &'c str>,
    ) -> Self {
        let mut values = IndexMap::with_capacity(headers.len());
        for (header, cell) in headers.iter().zip(cells) {
            if header.is_empty() {
                continue;
            }
            values.entry(header.clone()).or_insert_with(|| cell.to_string());
        }
        Self { index, values }
    }
}

enum RowSource<'a> {
    Delimited(delimited::DelimitedRows<'a>),
    Grid(GridRows),
    Objects(json::ObjectRows),
}

/// Lazy, finite, single-pass sequence of rows decoded from one file.
///
/// Yields `Err` only for a fatal decode problem part-way through the file;
/// callers abort the whole run on the first error.
pub struct RawRows<'a> {
    source: RowSource<'a>,
    buffered: Option<Result<RawRow, CoreError>>,
    next_index: usize,
}

impl<'a> RawRows<'a> {
    fn new(source: RowSource<'a>) -> Result<Self, CoreError> {
        let mut rows = Self {
            source,
            buffered: None,
            next_index: 0,
        };
        match rows.pull() {
            Some(Err(err)) => Err(err),
            None => Err(malformed("file contains a header but no data rows")),
            first => {
                rows.buffered = first;
                Ok(rows)
            }
        }
    }

    fn pull(&mut self) -> Option<Result<RawRow, CoreError>> {
        let index = self.next_index;
        let next = match &mut self.source {
            RowSource::Delimited(rows) => rows.next_row(index),
            RowSource::Grid(rows) => rows.next_row(index),
            RowSource::Objects(rows) => rows.next_row(index),
        };
        if matches!(next, Some(Ok(_))) {
            self.next_index += 1;
        }
        next
    }
}

impl std::fmt::Debug for RawRows<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawRows")
            .field("next_index", &self.next_index)
            .finish_non_exhaustive()
    }
}

impl Iterator for RawRows<'_> {
    type Item = Result<RawRow, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buffered.take().or_else(|| self.pull())
    }
}

/// Rows from a fully materialised cell grid (spreadsheets).
struct GridRows {
    headers: Vec<String>,
    rows: std::vec::IntoIter<Vec<String>>,
}

impl GridRows {
    fn new(grid: Vec<Vec<String>>) -> Result<Self, CoreError> {
        let mut rows = grid.into_iter();
        let headers = rows
            .by_ref()
            .find(|row| !is_blank(row.iter().map(String::as_str)))
            .ok_or_else(|| malformed("sheet has no header row"))?;
        Ok(Self {
            headers: normalize_headers(headers.iter().map(String::as_str)),
            rows,
        })
    }

    fn next_row(&mut self, index: usize) -> Option<Result<RawRow, CoreError>> {
        let row = self
            .rows
            .by_ref()
            .find(|row| !is_blank(row.iter().map(String::as_str)))?;
        Some(Ok(RawRow::from_cells(
            index,
            &self.headers,
            row.iter().map(String::as_str),
        )))
    }
}

pub(crate) fn is_blank<'c>(mut cells: impl Iterator<Item = &'c str>) -> bool {
    cells.all(|cell| cell.trim().is_empty())
}

pub(crate) fn normalize_headers<'c>(cells: impl Iterator<Item = &'c str>) -> Vec<String> {
    cells.map(|cell| cell.trim().to_string()).collect()
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Decode `bytes` as the declared format name.
///
/// Fails with `UnsupportedFormat` for an unknown format and `MalformedInput`
/// when no data row can be decoded.
pub fn parse<'a>(bytes: &'a [u8], declared_format: &str) -> Result<RawRows<'a>, CoreError> {
    let format =
        SourceFormat::from_str(declared_format).ok_or_else(|| unsupported(declared_format))?;
    parse_as(bytes, format)
}

/// Decode `bytes` as an already-resolved [`SourceFormat`].
pub fn parse_as(bytes: &[u8], format: SourceFormat) -> Result<RawRows<'_>, CoreError> {
    if bytes.is_empty() {
        return Err(malformed("file is empty"));
    }
    let source = match format {
        SourceFormat::Csv => RowSource::Delimited(delimited::DelimitedRows::new(bytes)?),
        SourceFormat::Xlsx => RowSource::Grid(GridRows::new(xlsx::read_first_sheet(bytes)?)?),
        SourceFormat::Json => RowSource::Objects(json::ObjectRows::new(bytes)?),
    };
    RawRows::new(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn format_from_str_is_case_insensitive() {
        assert_eq!(SourceFormat::from_str("CSV"), Some(SourceFormat::Csv));
        assert_eq!(SourceFormat::from_str(" xlsx "), Some(SourceFormat::Xlsx));
        assert!(SourceFormat::from_str("xls").is_none());
    }

    #[test]
    fn format_from_filename_uses_extension() {
        assert_eq!(
            SourceFormat::from_filename("inventory.export.JSON"),
            Some(SourceFormat::Json)
        );
        assert!(SourceFormat::from_filename("noextension").is_none());
    }

    #[test]
    fn format_from_content_type_ignores_parameters() {
        assert_eq!(
            SourceFormat::from_content_type("text/csv; charset=utf-8"),
            Some(SourceFormat::Csv)
        );
    }

    #[test]
    fn detect_prefers_declared_then_extension_then_content_type() {
        assert_eq!(
            SourceFormat::detect(Some("json"), "items.csv", None).unwrap(),
            SourceFormat::Json
        );
        assert_eq!(
            SourceFormat::detect(None, "items.csv", Some("application/json")).unwrap(),
            SourceFormat::Csv
        );
        assert_eq!(
            SourceFormat::detect(None, "upload", Some("application/json")).unwrap(),
            SourceFormat::Json
        );
    }

    #[test]
    fn detect_rejects_unknown() {
        assert_matches!(
            SourceFormat::detect(None, "menu.pdf", Some("application/pdf")),
            Err(CoreError::UnsupportedFormat(_))
        );
        assert_matches!(
            SourceFormat::detect(Some("xml"), "menu.csv", None),
            Err(CoreError::UnsupportedFormat(_))
        );
    }

    #[test]
    fn parse_rejects_unknown_declared_format() {
        assert_matches!(
            parse(b"a,b\n1,2\n", "parquet"),
            Err(CoreError::UnsupportedFormat(_))
        );
    }

    #[test]
    fn parse_rejects_empty_bytes() {
        assert_matches!(parse(b"", "csv"), Err(CoreError::MalformedInput(_)));
    }

    #[test]
    fn row_from_cells_keeps_first_duplicate_header() {
        let headers = vec!["Name".to_string(), "".to_string(), "Name".to_string()];
        let row = RawRow::from_cells(0, &headers, ["first", "ignored", "second"]);
        assert_eq!(row.get("Name"), Some("first"));
        assert_eq!(row.values.len(), 1);
    }

    #[test]
    fn grid_skips_leading_and_blank_rows() {
        let grid = vec![
            vec!["".to_string(), " ".to_string()],
            vec!["Name".to_string(), "SKU".to_string()],
            vec!["Flour".to_string(), "F-1".to_string()],
            vec!["".to_string(), "".to_string()],
            vec!["Sugar".to_string()],
        ];
        let rows: Vec<RawRow> = RawRows::new(RowSource::Grid(GridRows::new(grid).unwrap()))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("SKU"), Some("F-1"));
        assert_eq!(rows[1].index, 1);
        assert_eq!(rows[1].get("Name"), Some("Sugar"));
        assert_eq!(rows[1].get("SKU"), None);
    }
}
