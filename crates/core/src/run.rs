//! Migration run records and their state machine.
//!
//! A run is created `pending` when a file has been analyzed, and finalized
//! exactly once: `completed` when its batch was applied, `failed` when the
//! apply was rolled back. Runs are never deleted.

use serde::{Deserialize, Serialize};

use crate::diff::{DiffCounts, DiffType};
use crate::error::CoreError;
use crate::types::{EntityId, RunId, Timestamp};

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Completed,
    Failed,
}

impl RunStatus {
    /// Return the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a status string. Returns `None` for unknown values.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed) | (Self::Pending, Self::Failed)
        )
    }

    /// All valid status values.
    pub const ALL: &'static [&'static str] = &["pending", "completed", "failed"];
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// `migrate` imports once; `link` is recorded for a future recurring sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    #[default]
    Migrate,
    Link,
}

impl MigrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Migrate => "migrate",
            Self::Link => "link",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "migrate" => Some(Self::Migrate),
            "link" => Some(Self::Link),
            _ => None,
        }
    }

    pub const ALL: &'static [&'static str] = &["migrate", "link"];
}

impl std::fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// The entity that made a batch fail, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub external_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRun {
    pub run_id: RunId,
    pub tenant_id: String,
    pub source_provider: String,
    pub entity_type: String,
    pub mode: MigrationMode,
    pub filename: String,
    pub status: RunStatus,
    pub counts: DiffCounts,
    pub total_rows: usize,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub summary_text: Option<String>,
    pub failure: Option<RunFailure>,
}

impl MigrationRun {
    /// A new pending run for an analyzed file.
    pub fn pending(
        tenant_id: &str,
        source_provider: &str,
        entity_type: &str,
        mode: MigrationMode,
        filename: &str,
        counts: DiffCounts,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::now_v7(),
            tenant_id: tenant_id.to_string(),
            source_provider: source_provider.to_string(),
            entity_type: entity_type.to_string(),
            mode,
            filename: filename.to_string(),
            status: RunStatus::Pending,
            total_rows: counts.total(),
            counts,
            started_at: chrono::Utc::now(),
            completed_at: None,
            summary_text: None,
            failure: None,
        }
    }

    pub fn complete(&mut self, summary_text: String) -> Result<(), CoreError> {
        self.transition(RunStatus::Completed)?;
        self.summary_text = Some(summary_text);
        Ok(())
    }

    pub fn fail(&mut self, failure: RunFailure) -> Result<(), CoreError> {
        self.transition(RunStatus::Failed)?;
        self.summary_text = Some(format!(
            "Failed at '{}': {}; no changes were applied",
            failure.external_id, failure.reason
        ));
        self.failure = Some(failure);
        Ok(())
    }

    fn transition(&mut self, next: RunStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Conflict(format!(
                "run {} is already {}",
                self.run_id, self.status
            )));
        }
        self.status = next;
        self.completed_at = Some(chrono::Utc::now());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-entry audit log
// ---------------------------------------------------------------------------

/// What execution did with one diff entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOutcome {
    Inserted,
    Patched,
    Restored,
    Unchanged,
    ConflictIgnored,
    UpdateIgnored,
    RestoreSkipped,
}

impl EntryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Patched => "patched",
            Self::Restored => "restored",
            Self::Unchanged => "unchanged",
            Self::ConflictIgnored => "conflict_ignored",
            Self::UpdateIgnored => "update_ignored",
            Self::RestoreSkipped => "restore_skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "inserted" => Some(Self::Inserted),
            "patched" => Some(Self::Patched),
            "restored" => Some(Self::Restored),
            "unchanged" => Some(Self::Unchanged),
            "conflict_ignored" => Some(Self::ConflictIgnored),
            "update_ignored" => Some(Self::UpdateIgnored),
            "restore_skipped" => Some(Self::RestoreSkipped),
            _ => None,
        }
    }

    /// All valid outcome values.
    pub const ALL: &'static [&'static str] = &[
        "inserted",
        "patched",
        "restored",
        "unchanged",
        "conflict_ignored",
        "update_ignored",
        "restore_skipped",
    ];
}

impl std::fmt::Display for EntryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEntryLog {
    pub run_id: RunId,
    pub source_row_index: usize,
    pub external_id: String,
    pub entry_type: DiffType,
    pub outcome: EntryOutcome,
    pub entity_id: Option<EntityId>,
}

/// History query filters. `limit`/`offset` are clamped by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    pub provider: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl RunFilter {
    pub fn matches(&self, run: &MigrationRun) -> bool {
        self.provider
            .as_deref()
            .is_none_or(|p| run.source_provider.eq_ignore_ascii_case(p))
            && self.status.is_none_or(|s| run.status == s)
    }
}

/// Human summary of an applied batch, e.g.
/// `"Imported 60 new, updated 3, restored 1; 40 unchanged, 2 conflicts ignored"`.
pub fn summarize(entries: &[RunEntryLog]) -> String {
    let count = |outcome: EntryOutcome| entries.iter().filter(|e| e.outcome == outcome).count();

    let applied = [
        (count(EntryOutcome::Inserted), "new"),
        (count(EntryOutcome::Patched), "updated"),
        (count(EntryOutcome::Restored), "restored"),
    ];
    let left = [
        (count(EntryOutcome::Unchanged), "unchanged"),
        (count(EntryOutcome::ConflictIgnored), "conflicts ignored"),
        (count(EntryOutcome::UpdateIgnored), "updates ignored"),
        (count(EntryOutcome::RestoreSkipped), "restores skipped"),
    ];

    let join = |parts: &[(usize, &str)]| {
        parts
            .iter()
            .filter(|(n, _)| *n > 0)
            .map(|(n, label)| format!("{n} {label}"))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let applied = join(&applied);
    let left = join(&left);
    match (applied.is_empty(), left.is_empty()) {
        (true, true) => "Nothing to import".to_string(),
        (false, true) => format!("Imported {applied}"),
        (true, false) => format!("No changes applied; {left}"),
        (false, false) => format!("Imported {applied}; {left}"),
    }
}
