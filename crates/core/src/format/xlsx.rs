//! Minimal XLSX reader: the first worksheet of a workbook as a grid of cell
//! text.
//!
//! Only what a data export needs is understood: shared strings, inline
//! strings, booleans and raw numeric text. Styles, formulas and dates are
//! read as the literal value Excel cached in the sheet.

use std::io::{Cursor, Read, Seek};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::result::ZipError;
use zip::ZipArchive;

use super::malformed;
use crate::error::CoreError;

const WORKBOOK: &str = "xl/workbook.xml";
const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const DEFAULT_SHEET: &str = "xl/worksheets/sheet1.xml";
/// Last column Excel allows (`XFD`), zero-based.
const MAX_COLUMN: usize = 16_383;

/// Read the first worksheet listed in the workbook into rows of cell text.
pub(super) fn read_first_sheet(bytes: &[u8]) -> Result<Vec<Vec<String>>, CoreError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| malformed(format!("not a valid XLSX archive: {e}")))?;

    let shared = match read_entry(&mut archive, SHARED_STRINGS)? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let sheet_path = first_sheet_path(&mut archive)?;
    let sheet = read_entry(&mut archive, &sheet_path)?
        .ok_or_else(|| malformed(format!("workbook has no worksheet at {sheet_path}")))?;

    parse_sheet(&sheet, &shared)
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, CoreError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(malformed(format!("cannot open {name}: {e}"))),
    };
    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(|e| malformed(format!("cannot read {name}: {e}")))?;
    Ok(Some(content))
}

fn xml_error(part: &str, err: impl std::fmt::Display) -> CoreError {
    malformed(format!("invalid XML in {part}: {err}"))
}

fn attr(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Resolve the archive path of the first `<sheet>` in `xl/workbook.xml`
/// through the workbook relationships. Falls back to `sheet1.xml`.
fn first_sheet_path<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String, CoreError> {
    let Some(workbook) = read_entry(archive, WORKBOOK)? else {
        return Ok(DEFAULT_SHEET.to_string());
    };

    let mut reader = Reader::from_str(&workbook);
    let mut rel_id = None;
    loop {
        match reader.read_event().map_err(|e| xml_error(WORKBOOK, e))? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                rel_id = attr(&e, b"r:id");
                break;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    let Some(rel_id) = rel_id else {
        return Ok(DEFAULT_SHEET.to_string());
    };
    let Some(rels) = read_entry(archive, WORKBOOK_RELS)? else {
        return Ok(DEFAULT_SHEET.to_string());
    };

    let mut reader = Reader::from_str(&rels);
    loop {
        match reader.read_event().map_err(|e| xml_error(WORKBOOK_RELS, e))? {
            Event::Start(e) | Event::Empty(e)
                if e.local_name().as_ref() == b"Relationship"
                    && attr(&e, b"Id").as_deref() == Some(rel_id.as_str()) =>
            {
                let target = attr(&e, b"Target").unwrap_or_default();
                return Ok(match target.strip_prefix('/') {
                    Some(absolute) => absolute.to_string(),
                    None => format!("xl/{target}"),
                });
            }
            Event::Eof => return Ok(DEFAULT_SHEET.to_string()),
            _ => {}
        }
    }
}

/// Collect `<si>` entries. Rich-text runs are concatenated; phonetic hints
/// (`<rPh>`) are dropped.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>, CoreError> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event().map_err(|e| xml_error(SHARED_STRINGS, e))? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_text = !in_phonetic,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_text => {
                let text = t.unescape().map_err(|e| xml_error(SHARED_STRINGS, e))?;
                if let Some(s) = current.as_mut() {
                    s.push_str(&text);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

struct PendingCell {
    column: usize,
    kind: Option<String>,
    value: String,
}

fn parse_sheet(xml: &str, shared: &[String]) -> Result<Vec<Vec<String>>, CoreError> {
    const PART: &str = "worksheet";
    let mut reader = Reader::from_str(xml);
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Option<Vec<String>> = None;
    let mut cell: Option<PendingCell> = None;
    let mut capture = false;

    loop {
        match reader.read_event().map_err(|e| xml_error(PART, e))? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row = Some(Vec::new()),
                b"c" => {
                    let column = match attr(&e, b"r") {
                        Some(r) => column_index(&r).ok_or_else(|| {
                            malformed(format!("{PART} has an invalid cell reference '{r}'"))
                        })?,
                        None => row.as_ref().map_or(0, Vec::len),
                    };
                    if column > MAX_COLUMN {
                        return Err(malformed(format!(
                            "{PART} has more than {} columns",
                            MAX_COLUMN + 1
                        )));
                    }
                    cell = Some(PendingCell {
                        column,
                        kind: attr(&e, b"t"),
                        value: String::new(),
                    });
                }
                b"v" | b"t" => capture = cell.is_some(),
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"row" => rows.push(Vec::new()),
            Event::Text(t) if capture => {
                let text = t.unescape().map_err(|e| xml_error(PART, e))?;
                if let Some(c) = cell.as_mut() {
                    c.value.push_str(&text);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    if let (Some(c), Some(r)) = (cell.take(), row.as_mut()) {
                        if r.len() <= c.column {
                            r.resize(c.column + 1, String::new());
                        }
                        r[c.column] = resolve_cell(&c, shared);
                    }
                }
                b"row" => rows.extend(row.take()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows)
}

fn resolve_cell(cell: &PendingCell, shared: &[String]) -> String {
    match cell.kind.as_deref() {
        Some("s") => cell
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned())
            .unwrap_or_default(),
        Some("b") => match cell.value.trim() {
            "1" => "true".to_string(),
            "0" => "false".to_string(),
            other => other.to_string(),
        },
        _ => cell.value.clone(),
    }
}

/// Zero-based column index from an A1-style reference (`"C7"` -> 2).
/// `None` without column letters or past column `XFD`.
fn column_index(reference: &str) -> Option<usize> {
    let letters: Vec<u8> = reference
        .bytes()
        .take_while(u8::is_ascii_alphabetic)
        .map(|b| b.to_ascii_uppercase())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let number = letters.iter().try_fold(0usize, |acc, b| {
        acc.checked_mul(26)?
            .checked_add(usize::from(b - b'A' + 1))
            .filter(|n| *n <= MAX_COLUMN + 1)
    })?;
    Some(number - 1)
}
