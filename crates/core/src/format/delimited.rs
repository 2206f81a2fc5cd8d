//! CSV decoding.

use super::{is_blank, malformed, normalize_headers, RawRow};
use crate::error::CoreError;

/// UTF-8 BOM bytes.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Strip UTF-8 BOM from the beginning of data if present.
fn strip_utf8_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(UTF8_BOM).unwrap_or(data)
}

/// Streaming CSV rows. The header is the first non-blank record; records are
/// decoded one at a time as the caller pulls them.
pub(super) struct DelimitedRows<'a> {
    headers: Vec<String>,
    records: csv::StringRecordsIntoIter<&'a [u8]>,
}

impl<'a> DelimitedRows<'a> {
    pub(super) fn new(data: &'a [u8]) -> Result<Self, CoreError> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(strip_utf8_bom(data));
        let mut records = reader.into_records();

        let headers = loop {
            match records.next() {
                Some(Ok(record)) if is_blank(record.iter()) => continue,
                Some(Ok(record)) => break normalize_headers(record.iter()),
                Some(Err(e)) => return Err(malformed(format!("invalid CSV header: {e}"))),
                None => return Err(malformed("CSV file has no header row")),
            }
        };

        Ok(Self { headers, records })
    }

    pub(super) fn next_row(&mut self, index: usize) -> Option<Result<RawRow, CoreError>> {
        loop {
            match self.records.next()? {
                Ok(record) if is_blank(record.iter()) => continue,
                Ok(record) => return Some(Ok(RawRow::from_cells(index, &self.headers, record.iter()))),
                Err(e) => {
                    return Some(Err(malformed(format!(
                        "invalid CSV data after row {index}: {e}"
                    ))))
                }
            }
        }
    }
}
