//! Header-to-field mapping.
//!
//! Legacy exports name their columns however the vendor felt like it that
//! year. For each target field the profile lists header aliases in priority
//! order; the first alias present in a row's header set (compared
//! case-insensitively with whitespace collapsed) supplies the value. A header
//! claimed by one field is not offered to later fields.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::format::RawRow;
use crate::hashing::hashed_id;
use crate::profile::{FieldKind, MappingProfile};
use crate::types::FieldMap;

static DECIMAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?(\d+\.?\d*|\.\d+)$").expect("valid regex"));

/// A source row normalized onto the target schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyRecord {
    pub external_id: String,
    pub fields: FieldMap,
    pub source_provider: String,
    pub source_row_index: usize,
}

/// Map decoded rows onto `profile`.
///
/// Stops at the first decode error from `rows`. Fails with
/// [`CoreError::Mapping`] when no row has a column for the profile's
/// identity field.
pub fn map_rows<I>(rows: I, profile: &MappingProfile) -> Result<Vec<LegacyRecord>, CoreError>
where
    I: IntoIterator<Item = Result<RawRow, CoreError>>,
{
    let mut resolutions: HashMap<Vec<String>, ColumnResolution> = HashMap::new();
    let mut identity_seen = false;
    let mut records = Vec::new();

    for row in rows {
        let row = row?;
        let header_key: Vec<String> = row.headers().map(str::to_string).collect();
        let resolution = resolutions
            .entry(header_key)
            .or_insert_with(|| ColumnResolution::resolve(&row, profile));
        identity_seen |= resolution.covers(&profile.identity_field);
        records.push(resolution.apply(&row, profile));
    }

    if !identity_seen {
        let aliases = profile
            .field(&profile.identity_field)
            .map(|f| f.aliases.clone())
            .unwrap_or_default();
        return Err(CoreError::Mapping {
            field: profile.identity_field.clone(),
            aliases,
        });
    }

    records
        .into_iter()
        .map(|(fields, index)| {
            let external_id = external_id_for(&fields, profile).ok_or_else(|| {
                CoreError::MalformedInput(format!(
                    "row {index} has no value for '{}' and no identifying code",
                    profile.identity_field
                ))
            })?;
            Ok(LegacyRecord {
                external_id,
                fields,
                source_provider: profile.provider.clone(),
                source_row_index: index,
            })
        })
        .collect()
}

/// Field name -> source header, for one distinct header set.
struct ColumnResolution {
    columns: Vec<(String, String)>,
}

impl ColumnResolution {
    fn resolve(row: &RawRow, profile: &MappingProfile) -> Self {
        let mut available: Vec<(String, &str)> =
            row.headers().map(|h| (normalize_key(h), h)).collect();
        let mut columns = Vec::new();

        for spec in &profile.fields {
            let hit = spec.aliases.iter().find_map(|alias| {
                let alias = normalize_key(alias);
                available.iter().position(|(key, _)| *key == alias)
            });
            if let Some(pos) = hit {
                let (_, header) = available.remove(pos);
                columns.push((spec.field.clone(), header.to_string()));
            }
        }
        Self { columns }
    }

    fn covers(&self, field: &str) -> bool {
        self.columns.iter().any(|(f, _)| f == field)
    }

    fn apply(&self, row: &RawRow, profile: &MappingProfile) -> (FieldMap, usize) {
        let mut fields = FieldMap::new();
        for (field, header) in &self.columns {
            let Some(raw) = row.get(header) else { continue };
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            fields.insert(field.clone(), coerce(raw, profile.kind_of(field)));
        }
        (fields, row.index)
    }
}

fn normalize_key(header: &str) -> String {
    header
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Collapse whitespace and lower-case; the identity used for hashed ids.
pub fn normalize_name(name: &str) -> String {
    normalize_key(name)
}

fn external_id_for(fields: &FieldMap, profile: &MappingProfile) -> Option<String> {
    let explicit = profile
        .id_field
        .iter()
        .chain(profile.code_fields.iter())
        .find_map(|f| fields.get(f).map(value_text))
        .filter(|v| !v.is_empty());
    if explicit.is_some() {
        return explicit;
    }

    let name = fields.get(&profile.identity_field).map(value_text)?;
    let name = normalize_name(&name);
    if name.is_empty() {
        return None;
    }
    Some(hashed_id(&profile.provider, &name))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn coerce(raw: &str, kind: FieldKind) -> Value {
    let typed = match kind {
        FieldKind::Text => None,
        FieldKind::Decimal => parse_decimal(raw)
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        FieldKind::Integer => parse_integer(raw).map(Value::from),
        FieldKind::Boolean => parse_bool(raw).map(Value::Bool),
    };
    typed.unwrap_or_else(|| Value::String(raw.to_string()))
}

/// Parse money and quantity text: currency symbols, thousands separators,
/// spaces and `%` are dropped; `(12.50)` is negative.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let (negative, inner) = match trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };
    let cleaned: String = inner
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | '%') && !c.is_whitespace())
        .collect();
    if !DECIMAL_RE.is_match(&cleaned) {
        return None;
    }
    let value: f64 = cleaned.parse().ok()?;
    Some(if negative { -value } else { value })
}

fn parse_integer(raw: &str) -> Option<i64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    if let Ok(value) = cleaned.parse::<i64>() {
        return Some(value);
    }
    // Spreadsheets store whole numbers as "12.0".
    let value = parse_decimal(raw)?;
    (value.fract() == 0.0 && value.abs() < i64::MAX as f64).then_some(value as i64)
}

/// Lenient boolean text.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "active" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "inactive" => Some(false),
        _ => None,
    }
}
