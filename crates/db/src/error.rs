use quicksync_core::error::CoreError;
use quicksync_core::run::RunStatus;
use quicksync_core::types::RunId;

/// Errors raised by the entity and history stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A write in a batch was refused; the whole batch was rolled back.
    #[error("Write rejected for '{external_id}': {reason}")]
    Rejected { external_id: String, reason: String },

    #[error("Migration run {0} not found")]
    RunNotFound(RunId),

    #[error("Migration run {run_id} is already {status}")]
    RunFinalized { run_id: RunId, status: RunStatus },

    #[error("Migration run {0} already recorded")]
    DuplicateRun(RunId),

    #[error("Stored row could not be decoded: {0}")]
    Decode(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected {
                external_id,
                reason,
            } => CoreError::Execution {
                external_id,
                reason,
            },
            StoreError::RunNotFound(id) => CoreError::NotFound {
                entity: "migration_run",
                id: id.to_string(),
            },
            e @ (StoreError::RunFinalized { .. } | StoreError::DuplicateRun(_)) => {
                CoreError::Conflict(e.to_string())
            }
            e => CoreError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn rejected_write_becomes_execution_error() {
        let err: CoreError = StoreError::Rejected {
            external_id: "SKU-1".into(),
            reason: "entity changed since preview".into(),
        }
        .into();
        assert_matches!(err, CoreError::Execution { external_id, .. } if external_id == "SKU-1");
    }

    #[test]
    fn finalized_run_becomes_conflict() {
        let err: CoreError = StoreError::RunFinalized {
            run_id: RunId::nil(),
            status: RunStatus::Completed,
        }
        .into();
        assert_matches!(err, CoreError::Conflict(msg) if msg.contains("completed"));
    }

    #[test]
    fn missing_run_becomes_not_found() {
        let err: CoreError = StoreError::RunNotFound(RunId::nil()).into();
        assert_matches!(err, CoreError::NotFound { entity: "migration_run", .. });
    }
}
