/// Domain errors raised by the migration engine.
///
/// Parse and mapping errors abort a run before any [`crate::run::MigrationRun`]
/// exists; decision errors abort an execute before any write; `Execution`
/// is the only variant that is persisted as a failed run.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error(
        "No column in the file matches required field '{field}' (expected one of: {})",
        .aliases.join(", ")
    )]
    Mapping { field: String, aliases: Vec<String> },

    #[error("Conflicts need an overwrite or ignore decision: {}", .external_ids.join(", "))]
    UnresolvedConflict { external_ids: Vec<String> },

    #[error("Restores need a restore or skip decision: {}", .external_ids.join(", "))]
    UnresolvedRestore { external_ids: Vec<String> },

    #[error("Execution failed at '{external_id}': {reason}")]
    Execution { external_id: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_error_names_field_and_aliases() {
        let err = CoreError::Mapping {
            field: "name".to_string(),
            aliases: vec!["Name".to_string(), "Item Name".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'name'"));
        assert!(msg.contains("Name, Item Name"));
    }

    #[test]
    fn unresolved_conflict_lists_ids() {
        let err = CoreError::UnresolvedConflict {
            external_ids: vec!["SKU-1".to_string(), "SKU-9".to_string()],
        };
        assert!(err.to_string().ends_with("SKU-1, SKU-9"));
    }
}
