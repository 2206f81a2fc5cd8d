//! Diff entry types produced by reconciliation and consumed by execution.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::resolve::Decision;
use crate::types::{EntityId, FieldMap};

/// Classification of one incoming record against the system of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    New,
    Update,
    Conflict,
    Unchanged,
    RestoreFromArchive,
    RestoreFromTrash,
}

impl DiffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Update => "update",
            Self::Conflict => "conflict",
            Self::Unchanged => "unchanged",
            Self::RestoreFromArchive => "restore_from_archive",
            Self::RestoreFromTrash => "restore_from_trash",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "update" => Some(Self::Update),
            "conflict" => Some(Self::Conflict),
            "unchanged" => Some(Self::Unchanged),
            "restore_from_archive" => Some(Self::RestoreFromArchive),
            "restore_from_trash" => Some(Self::RestoreFromTrash),
            _ => None,
        }
    }

    pub fn is_restore(&self) -> bool {
        matches!(self, Self::RestoreFromArchive | Self::RestoreFromTrash)
    }

    /// All valid diff type values.
    pub const ALL: &'static [&'static str] = &[
        "new",
        "update",
        "conflict",
        "unchanged",
        "restore_from_archive",
        "restore_from_trash",
    ];
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Before/after pair for one differing field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    /// `None` when the stored entity has no value for the field.
    pub old: Option<Value>,
    pub new: Value,
}

/// One reconciled record, shown to the operator at preview and sent back
/// with their decisions at execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    #[serde(rename = "type")]
    pub entry_type: DiffType,
    pub external_id: String,
    #[serde(default)]
    pub target_entity_id: Option<EntityId>,
    #[serde(default)]
    pub changed_fields: Vec<FieldChange>,
    #[serde(default)]
    pub message: String,
    pub source_row_index: usize,
    /// Full incoming record. Inserts write all of it.
    #[serde(default)]
    pub fields: FieldMap,
    /// Entity revision observed at preview; execution refuses to write over
    /// a newer one.
    #[serde(default)]
    pub base_revision: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
}

impl DiffEntry {
    pub fn changed_field_names(&self) -> impl Iterator<Item = &str> {
        self.changed_fields.iter().map(|c| c.field.as_str())
    }
}

// ---------------------------------------------------------------------------
// Preview manifest
// ---------------------------------------------------------------------------

/// What the server classified for one row at preview. Stored with the
/// pending run so execute can refuse entries edited on the way back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRow {
    pub source_row_index: usize,
    pub external_id: String,
    pub entry_type: DiffType,
    pub changed_fields: Vec<String>,
    pub base_revision: Option<i64>,
}

impl From<&DiffEntry> for PreviewRow {
    fn from(entry: &DiffEntry) -> Self {
        Self {
            source_row_index: entry.source_row_index,
            external_id: entry.external_id.clone(),
            entry_type: entry.entry_type,
            changed_fields: entry.changed_field_names().map(str::to_string).collect(),
            base_revision: entry.base_revision,
        }
    }
}

pub fn preview_rows(entries: &[DiffEntry]) -> Vec<PreviewRow> {
    entries.iter().map(PreviewRow::from).collect()
}

/// Check that `entries` are exactly the rows previewed: one per previewed
/// row index, each with the previewed external id, type, changed field
/// names and base revision. Field values may differ.
pub fn verify_against_preview(preview: &[PreviewRow], entries: &[DiffEntry]) -> Result<(), CoreError> {
    if preview.len() != entries.len() {
        return Err(CoreError::Validation(format!(
            "{} rows were previewed but {} entries were submitted",
            preview.len(),
            entries.len()
        )));
    }
    let by_row: HashMap<usize, &PreviewRow> =
        preview.iter().map(|row| (row.source_row_index, row)).collect();
    let mut seen = HashSet::new();

    for entry in entries {
        let index = entry.source_row_index;
        if !seen.insert(index) {
            return Err(CoreError::Validation(format!(
                "row {index} was submitted more than once"
            )));
        }
        let Some(row) = by_row.get(&index) else {
            return Err(CoreError::Validation(format!("row {index} was not previewed")));
        };
        let submitted = PreviewRow::from(entry);
        if submitted.external_id != row.external_id {
            return Err(CoreError::Validation(format!(
                "row {index} was previewed as '{}', not '{}'",
                row.external_id, submitted.external_id
            )));
        }
        if submitted.entry_type != row.entry_type {
            return Err(CoreError::Validation(format!(
                "row {index} ('{}') was previewed as {}, not {}",
                row.external_id, row.entry_type, submitted.entry_type
            )));
        }
        if submitted.changed_fields != row.changed_fields
            || submitted.base_revision != row.base_revision
        {
            return Err(CoreError::Validation(format!(
                "row {index} ('{}') does not match its preview; analyze the file again",
                row.external_id
            )));
        }
    }
    Ok(())
}

/// Per-category totals for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffCounts {
    pub new: usize,
    pub update: usize,
    pub conflict: usize,
    pub unchanged: usize,
    pub restore_from_archive: usize,
    pub restore_from_trash: usize,
}

impl DiffCounts {
    pub fn record(&mut self, entry_type: DiffType) {
        *self.slot(entry_type) += 1;
    }

    pub fn get(&self, entry_type: DiffType) -> usize {
        match entry_type {
            DiffType::New => self.new,
            DiffType::Update => self.update,
            DiffType::Conflict => self.conflict,
            DiffType::Unchanged => self.unchanged,
            DiffType::RestoreFromArchive => self.restore_from_archive,
            DiffType::RestoreFromTrash => self.restore_from_trash,
        }
    }

    pub fn total(&self) -> usize {
        self.new
            + self.update
            + self.conflict
            + self.unchanged
            + self.restore_from_archive
            + self.restore_from_trash
    }

    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a DiffEntry>) -> Self {
        let mut counts = Self::default();
        for entry in entries {
            counts.record(entry.entry_type);
        }
        counts
    }

    fn slot(&mut self, entry_type: DiffType) -> &mut usize {
        match entry_type {
            DiffType::New => &mut self.new,
            DiffType::Update => &mut self.update,
            DiffType::Conflict => &mut self.conflict,
            DiffType::Unchanged => &mut self.unchanged,
            DiffType::RestoreFromArchive => &mut self.restore_from_archive,
            DiffType::RestoreFromTrash => &mut self.restore_from_trash,
        }
    }
}
