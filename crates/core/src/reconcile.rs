//! Classification of incoming records against a system-of-record snapshot.
//!
//! Each record gets exactly one [`DiffEntry`], in source order, by strict
//! precedence: trashed match, archived match, protected-field difference,
//! other difference, no difference, no match. Records sharing an external id
//! are classified against the state the earlier ones would leave behind, so
//! the resulting batch can be applied in order.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::diff::{DiffCounts, DiffEntry, DiffType, FieldChange};
use crate::entity::{EntityState, Snapshot};
use crate::error::CoreError;
use crate::mapper::{parse_bool, parse_decimal, LegacyRecord};
use crate::profile::{FieldKind, MappingProfile};
use crate::types::{EntityId, FieldMap};

/// Tolerance for numeric equality of decimal fields.
const NUMERIC_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Reconciliation {
    pub entries: Vec<DiffEntry>,
    pub counts: DiffCounts,
}

/// What an entity looks like once the earlier rows of this batch are applied.
struct Projected {
    entity_id: Option<EntityId>,
    state: EntityState,
    fields: FieldMap,
    /// Stored revision, only until the batch first touches the entity.
    revision: Option<i64>,
}

pub fn reconcile(
    records: Vec<LegacyRecord>,
    snapshot: &Snapshot,
    profile: &MappingProfile,
) -> Reconciliation {
    let mut overlay: HashMap<String, Projected> = HashMap::new();
    let mut result = Reconciliation::default();

    for record in records {
        let current = overlay.remove(&record.external_id).or_else(|| {
            snapshot.get(&record.external_id).map(|stored| Projected {
                entity_id: Some(stored.id),
                state: stored.state,
                fields: stored.fields.clone(),
                revision: Some(stored.revision),
            })
        });

        let entry = classify(&record, current.as_ref(), profile);
        result.counts.record(entry.entry_type);

        let projected = match current {
            Some(mut p) => {
                p.state = EntityState::Active;
                p.revision = None;
                for change in &entry.changed_fields {
                    p.fields.insert(change.field.clone(), change.new.clone());
                }
                p
            }
            None => Projected {
                entity_id: None,
                state: EntityState::Active,
                fields: record.fields.clone(),
                revision: None,
            },
        };
        overlay.insert(record.external_id.clone(), projected);
        result.entries.push(entry);
    }

    result
}

/// Classify submitted entries again from their incoming `fields`, ignoring
/// whatever type and change set they arrived with. Inline decisions are
/// carried over by row index.
pub fn reclassify(
    entries: Vec<DiffEntry>,
    snapshot: &Snapshot,
    profile: &MappingProfile,
) -> Result<Reconciliation, CoreError> {
    let mut decisions = HashMap::new();
    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.external_id.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "row {} has no external id",
                entry.source_row_index
            )));
        }
        if let Some(decision) = entry.decision {
            decisions.insert(entry.source_row_index, decision);
        }
        records.push(LegacyRecord {
            external_id: entry.external_id,
            fields: entry.fields,
            source_provider: profile.provider.clone(),
            source_row_index: entry.source_row_index,
        });
    }
    records.sort_by_key(|r| r.source_row_index);
    if let Some(pair) = records
        .windows(2)
        .find(|pair| pair[0].source_row_index == pair[1].source_row_index)
    {
        return Err(CoreError::Validation(format!(
            "row {} was submitted more than once",
            pair[0].source_row_index
        )));
    }

    let mut result = reconcile(records, snapshot, profile);
    for entry in &mut result.entries {
        entry.decision = decisions.remove(&entry.source_row_index);
    }
    Ok(result)
}

fn classify(
    record: &LegacyRecord,
    current: Option<&Projected>,
    profile: &MappingProfile,
) -> DiffEntry {
    let mut entry = DiffEntry {
        entry_type: DiffType::New,
        external_id: record.external_id.clone(),
        target_entity_id: None,
        changed_fields: Vec::new(),
        message: "Not found in the system; will be created".to_string(),
        source_row_index: record.source_row_index,
        fields: record.fields.clone(),
        base_revision: None,
        decision: None,
    };
    let Some(current) = current else {
        return entry;
    };

    entry.target_entity_id = current.entity_id;
    entry.base_revision = current.revision;
    entry.changed_fields = changed_fields(&current.fields, &record.fields, profile);

    let (entry_type, message) = match current.state {
        EntityState::Trashed => (
            DiffType::RestoreFromTrash,
            format!("In the trash; restore to apply {}", change_summary(&entry)),
        ),
        EntityState::Archived => (
            DiffType::RestoreFromArchive,
            format!("Archived; restore to apply {}", change_summary(&entry)),
        ),
        EntityState::Active => {
            let protected: Vec<&str> = entry
                .changed_field_names()
                .filter(|f| profile.is_protected(f))
                .collect();
            if !protected.is_empty() {
                (
                    DiffType::Conflict,
                    format!("Protected field(s) differ: {}", protected.join(", ")),
                )
            } else if !entry.changed_fields.is_empty() {
                (
                    DiffType::Update,
                    format!("Will update {}", change_summary(&entry)),
                )
            } else {
                (DiffType::Unchanged, "Identical to the current record".to_string())
            }
        }
    };
    entry.entry_type = entry_type;
    entry.message = message;
    entry
}

fn change_summary(entry: &DiffEntry) -> String {
    if entry.changed_fields.is_empty() {
        "no field changes".to_string()
    } else {
        entry.changed_field_names().collect::<Vec<_>>().join(", ")
    }
}

/// Fields present on `incoming` whose value differs from `existing`, in
/// profile field order.
pub fn changed_fields(
    existing: &FieldMap,
    incoming: &FieldMap,
    profile: &MappingProfile,
) -> Vec<FieldChange> {
    let declared = profile.fields.iter().map(|f| f.field.as_str());
    let undeclared = incoming
        .keys()
        .map(String::as_str)
        .filter(|k| profile.field(k).is_none());

    declared
        .chain(undeclared)
        .filter_map(|field| {
            let new = incoming.get(field)?;
            let old = existing.get(field);
            match old {
                Some(old) if values_equal(profile.kind_of(field), old, new) => None,
                _ => Some(FieldChange {
                    field: field.to_string(),
                    old: old.cloned(),
                    new: new.clone(),
                }),
            }
        })
        .collect()
}

/// Kind-aware equality: numbers by value, booleans by meaning, text trimmed.
pub fn values_equal(kind: FieldKind, a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match kind {
        FieldKind::Decimal | FieldKind::Integer => {
            if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
                return (x - y).abs() < NUMERIC_EPSILON;
            }
        }
        FieldKind::Boolean => {
            if let (Some(x), Some(y)) = (as_bool(a), as_bool(b)) {
                return x == y;
            }
        }
        FieldKind::Text => {
            if let (Value::Number(_), Value::Number(_)) = (a, b) {
                return as_number(a) == as_number(b);
            }
        }
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.trim() == y.trim(),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => parse_bool(s),
        Value::Number(n) => n.as_i64().and_then(|i| match i {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }),
        _ => None,
    }
}
