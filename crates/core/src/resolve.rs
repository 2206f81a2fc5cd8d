//! Operator decisions on reviewed diff entries.
//!
//! Conflicts and restores never apply on their own: each needs an explicit
//! decision, and a batch with any undecided entry is rejected before a
//! single write happens.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::diff::{DiffEntry, DiffType};
use crate::entity::EntityState;
use crate::error::CoreError;
use crate::run::EntryOutcome;
use crate::types::FieldMap;

/// What the operator chose for one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    /// Incoming values win.
    Overwrite,
    /// Keep the stored record as is.
    Ignore,
    /// Incoming values win, except the listed fields take these values.
    Override { values: FieldMap },
    Restore,
    Skip,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overwrite => "overwrite",
            Self::Ignore => "ignore",
            Self::Override { .. } => "override",
            Self::Restore => "restore",
            Self::Skip => "skip",
        }
    }

    /// Whether the decision leads to a write.
    fn writes(&self) -> bool {
        matches!(self, Self::Overwrite | Self::Override { .. } | Self::Restore)
    }

    fn applies_to(&self, entry_type: DiffType) -> bool {
        match entry_type {
            DiffType::Conflict | DiffType::Update => {
                matches!(self, Self::Overwrite | Self::Ignore | Self::Override { .. })
            }
            DiffType::RestoreFromArchive | DiffType::RestoreFromTrash => {
                matches!(self, Self::Restore | Self::Skip)
            }
            DiffType::New | DiffType::Unchanged => false,
        }
    }
}

/// How an accepted entry is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    Insert,
    Patch,
    Restore { from: EntityState },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedEntry {
    pub entry: DiffEntry,
    pub action: ApplyAction,
}

/// An entry that needs no write, with the outcome logged for it.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEntry {
    pub entry: DiffEntry,
    pub outcome: EntryOutcome,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedBatch {
    pub accepted: Vec<AcceptedEntry>,
    pub skipped: Vec<SkippedEntry>,
}

/// Apply `decisions` (keyed by source row index) to `entries`.
///
/// A decision in `decisions` replaces one carried inline on the entry.
/// Fails with `UnresolvedConflict` if any conflict is undecided, otherwise
/// `UnresolvedRestore` if any restore is undecided, and `Validation` for a
/// decision that does not fit its entry.
///
/// Later rows for an external id were classified as if the earlier rows
/// apply. Once a row is skipped or ignored, every later row with the same
/// external id is skipped too; a later row carrying an overwrite, override
/// or restore decision is a `Validation` error.
pub fn resolve(
    mut entries: Vec<DiffEntry>,
    decisions: &BTreeMap<usize, Decision>,
) -> Result<ResolvedBatch, CoreError> {
    let mut unresolved_conflicts = Vec::new();
    let mut unresolved_restores = Vec::new();
    let mut batch = ResolvedBatch::default();
    // external id -> row index of the first row left unapplied
    let mut held_back: HashMap<String, usize> = HashMap::new();

    entries.sort_by_key(|e| e.source_row_index);

    for mut entry in entries {
        let decision = decisions
            .get(&entry.source_row_index)
            .cloned()
            .or_else(|| entry.decision.take());

        if let Some(decision) = &decision {
            if !decision.applies_to(entry.entry_type) {
                return Err(CoreError::Validation(format!(
                    "decision '{}' does not apply to {} entry '{}' (row {})",
                    decision.as_str(),
                    entry.entry_type,
                    entry.external_id,
                    entry.source_row_index
                )));
            }
        }

        if let Some(&earlier) = held_back.get(&entry.external_id) {
            if let Some(decision) = decision.as_ref().filter(|d| d.writes()) {
                return Err(CoreError::Validation(format!(
                    "row {} ('{}') cannot be applied with '{}': row {earlier} for the same \
                     external id is skipped, and later rows follow it",
                    entry.source_row_index,
                    entry.external_id,
                    decision.as_str()
                )));
            }
            let outcome = held_back_outcome(entry.entry_type);
            batch.skipped.push(SkippedEntry { entry, outcome });
            continue;
        }
        if matches!(decision, Some(Decision::Ignore | Decision::Skip)) {
            held_back.insert(entry.external_id.clone(), entry.source_row_index);
        }

        match (entry.entry_type, decision) {
            (DiffType::New, None) => batch.accepted.push(AcceptedEntry {
                entry,
                action: ApplyAction::Insert,
            }),
            (DiffType::Unchanged, None) => batch.skipped.push(SkippedEntry {
                entry,
                outcome: EntryOutcome::Unchanged,
            }),
            (DiffType::Conflict, None) => unresolved_conflicts.push(entry.external_id),
            (DiffType::RestoreFromArchive | DiffType::RestoreFromTrash, None) => {
                unresolved_restores.push(entry.external_id)
            }
            (DiffType::Update, None | Some(Decision::Overwrite)) => batch.accepted.push(AcceptedEntry {
                entry,
                action: ApplyAction::Patch,
            }),
            (DiffType::Conflict, Some(Decision::Overwrite)) => batch.accepted.push(AcceptedEntry {
                entry,
                action: ApplyAction::Patch,
            }),
            (entry_type @ (DiffType::Conflict | DiffType::Update), Some(Decision::Ignore)) => {
                batch.skipped.push(SkippedEntry {
                    entry,
                    outcome: if entry_type == DiffType::Conflict {
                        EntryOutcome::ConflictIgnored
                    } else {
                        EntryOutcome::UpdateIgnored
                    },
                })
            }
            (DiffType::Conflict | DiffType::Update, Some(Decision::Override { values })) => {
                apply_override(&mut entry, values)?;
                batch.accepted.push(AcceptedEntry {
                    entry,
                    action: ApplyAction::Patch,
                });
            }
            (entry_type, Some(Decision::Restore)) => {
                let from = if entry_type == DiffType::RestoreFromTrash {
                    EntityState::Trashed
                } else {
                    EntityState::Archived
                };
                batch.accepted.push(AcceptedEntry {
                    entry,
                    action: ApplyAction::Restore { from },
                });
            }
            (_, Some(Decision::Skip)) => batch.skipped.push(SkippedEntry {
                entry,
                outcome: EntryOutcome::RestoreSkipped,
            }),
            (entry_type, Some(decision)) => {
                return Err(CoreError::Internal(format!(
                    "unhandled decision '{}' for {entry_type}",
                    decision.as_str()
                )))
            }
        }
    }

    if !unresolved_conflicts.is_empty() {
        return Err(CoreError::UnresolvedConflict {
            external_ids: unresolved_conflicts,
        });
    }
    if !unresolved_restores.is_empty() {
        return Err(CoreError::UnresolvedRestore {
            external_ids: unresolved_restores,
        });
    }
    Ok(batch)
}

/// Outcome logged for a row that follows a skipped row of the same entity.
fn held_back_outcome(entry_type: DiffType) -> EntryOutcome {
    match entry_type {
        DiffType::Unchanged => EntryOutcome::Unchanged,
        DiffType::Conflict => EntryOutcome::ConflictIgnored,
        DiffType::RestoreFromArchive | DiffType::RestoreFromTrash => EntryOutcome::RestoreSkipped,
        DiffType::New | DiffType::Update => EntryOutcome::UpdateIgnored,
    }
}

/// Replace the incoming value of each listed field. Only fields that are
/// already part of the change set may be overridden.
fn apply_override(entry: &mut DiffEntry, values: FieldMap) -> Result<(), CoreError> {
    if values.is_empty() {
        return Err(CoreError::Validation(format!(
            "override for '{}' lists no values",
            entry.external_id
        )));
    }
    for (field, value) in values {
        let Some(change) = entry.changed_fields.iter_mut().find(|c| c.field == field) else {
            return Err(CoreError::Validation(format!(
                "override for '{}' names field '{field}', which is not being changed",
                entry.external_id
            )));
        };
        change.new = value.clone();
        entry.fields.insert(field, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::FieldChange;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn entry(index: usize, entry_type: DiffType) -> DiffEntry {
        DiffEntry {
            entry_type,
            external_id: format!("X{index}"),
            target_entity_id: None,
            changed_fields: match entry_type {
                DiffType::Conflict | DiffType::Update => vec![FieldChange {
                    field: "price".into(),
                    old: Some(json!(1.0)),
                    new: json!(2.0),
                }],
                _ => Vec::new(),
            },
            message: String::new(),
            source_row_index: index,
            fields: FieldMap::new(),
            base_revision: None,
            decision: None,
        }
    }

    fn decisions(pairs: &[(usize, Decision)]) -> BTreeMap<usize, Decision> {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn new_and_update_pass_without_decisions() {
        let batch = resolve(
            vec![entry(0, DiffType::New), entry(1, DiffType::Update), entry(2, DiffType::Unchanged)],
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(batch.accepted.len(), 2);
        assert_eq!(batch.accepted[0].action, ApplyAction::Insert);
        assert_eq!(batch.accepted[1].action, ApplyAction::Patch);
        assert_eq!(batch.skipped[0].outcome, EntryOutcome::Unchanged);
    }

    #[test]
    fn undecided_conflict_fails_closed() {
        let result = resolve(
            vec![entry(0, DiffType::New), entry(1, DiffType::Conflict), entry(2, DiffType::RestoreFromTrash)],
            &BTreeMap::new(),
        );
        assert_matches!(result, Err(CoreError::UnresolvedConflict { external_ids }) => {
            assert_eq!(external_ids, vec!["X1".to_string()]);
        });
    }

    #[test]
    fn undecided_restore_fails_closed() {
        let result = resolve(vec![entry(0, DiffType::RestoreFromArchive)], &BTreeMap::new());
        assert_matches!(result, Err(CoreError::UnresolvedRestore { .. }));
    }

    #[test]
    fn conflict_decisions() {
        let batch = resolve(
            vec![entry(0, DiffType::Conflict), entry(1, DiffType::Conflict)],
            &decisions(&[(0, Decision::Overwrite), (1, Decision::Ignore)]),
        )
        .unwrap();
        assert_eq!(batch.accepted.len(), 1);
        assert_eq!(batch.accepted[0].entry.external_id, "X0");
        assert_eq!(batch.skipped[0].outcome, EntryOutcome::ConflictIgnored);
    }

    #[test]
    fn inline_decision_is_used_when_map_has_none() {
        let mut conflict = entry(0, DiffType::Conflict);
        conflict.decision = Some(Decision::Ignore);
        let batch = resolve(vec![conflict.clone()], &BTreeMap::new()).unwrap();
        assert_eq!(batch.skipped.len(), 1);

        let batch = resolve(vec![conflict], &decisions(&[(0, Decision::Overwrite)])).unwrap();
        assert_eq!(batch.accepted.len(), 1);
    }

    #[test]
    fn restore_decisions_record_origin_state() {
        let batch = resolve(
            vec![entry(0, DiffType::RestoreFromTrash), entry(1, DiffType::RestoreFromArchive)],
            &decisions(&[(0, Decision::Restore), (1, Decision::Skip)]),
        )
        .unwrap();
        assert_eq!(
            batch.accepted[0].action,
            ApplyAction::Restore { from: EntityState::Trashed }
        );
        assert_eq!(batch.skipped[0].outcome, EntryOutcome::RestoreSkipped);
    }

    #[test]
    fn override_replaces_incoming_value() {
        let values = json!({"price": 1.75}).as_object().cloned().unwrap();
        let batch = resolve(
            vec![entry(0, DiffType::Conflict)],
            &decisions(&[(0, Decision::Override { values })]),
        )
        .unwrap();
        let accepted = &batch.accepted[0].entry;
        assert_eq!(accepted.changed_fields[0].new, json!(1.75));
        assert_eq!(accepted.fields["price"], json!(1.75));
    }

    #[test]
    fn override_of_unchanged_field_is_rejected() {
        let values = json!({"name": "Other"}).as_object().cloned().unwrap();
        let result = resolve(
            vec![entry(0, DiffType::Update)],
            &decisions(&[(0, Decision::Override { values })]),
        );
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[test]
    fn inapplicable_decision_is_rejected() {
        assert_matches!(
            resolve(vec![entry(0, DiffType::New)], &decisions(&[(0, Decision::Overwrite)])),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            resolve(vec![entry(0, DiffType::Conflict)], &decisions(&[(0, Decision::Restore)])),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            resolve(vec![entry(0, DiffType::RestoreFromTrash)], &decisions(&[(0, Decision::Ignore)])),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn decision_json_shape() {
        let decision: Decision =
            serde_json::from_value(json!({"action": "override", "values": {"price": 3}})).unwrap();
        assert_matches!(decision, Decision::Override { values } if values["price"] == json!(3));
        let decision: Decision = serde_json::from_value(json!({"action": "restore"})).unwrap();
        assert_eq!(decision, Decision::Restore);
    }

    fn same_id(mut entry: DiffEntry, external_id: &str) -> DiffEntry {
        entry.external_id = external_id.to_string();
        entry
    }

    #[test]
    fn skipped_restore_holds_back_later_rows() {
        let batch = resolve(
            vec![
                same_id(entry(0, DiffType::RestoreFromTrash), "SKU-5"),
                same_id(entry(1, DiffType::Update), "SKU-5"),
                entry(2, DiffType::Update),
            ],
            &decisions(&[(0, Decision::Skip)]),
        )
        .unwrap();
        assert_eq!(batch.accepted.len(), 1);
        assert_eq!(batch.accepted[0].entry.external_id, "X2");
        let outcomes: Vec<EntryOutcome> = batch.skipped.iter().map(|s| s.outcome).collect();
        assert_eq!(outcomes, vec![EntryOutcome::RestoreSkipped, EntryOutcome::UpdateIgnored]);
    }

    #[test]
    fn ignored_conflict_holds_back_later_undecided_conflict() {
        let batch = resolve(
            vec![
                same_id(entry(0, DiffType::Conflict), "SKU-1"),
                same_id(entry(1, DiffType::Conflict), "SKU-1"),
            ],
            &decisions(&[(0, Decision::Ignore)]),
        )
        .unwrap();
        assert!(batch.accepted.is_empty());
        assert_eq!(batch.skipped[1].outcome, EntryOutcome::ConflictIgnored);
    }

    #[test]
    fn writing_decision_after_skipped_row_is_rejected() {
        let result = resolve(
            vec![
                same_id(entry(0, DiffType::Conflict), "SKU-1"),
                same_id(entry(1, DiffType::Update), "SKU-1"),
            ],
            &decisions(&[(0, Decision::Ignore), (1, Decision::Overwrite)]),
        );
        assert_matches!(result, Err(CoreError::Validation(msg)) => {
            assert!(msg.contains("row 1"));
            assert!(msg.contains("row 0"));
        });
    }

    #[test]
    fn entries_are_resolved_in_source_order() {
        let batch = resolve(
            vec![
                same_id(entry(1, DiffType::Update), "SKU-5"),
                same_id(entry(0, DiffType::RestoreFromArchive), "SKU-5"),
            ],
            &decisions(&[(0, Decision::Skip)]),
        )
        .unwrap();
        assert!(batch.accepted.is_empty());
        assert_eq!(batch.skipped[0].entry.source_row_index, 0);
    }
}
