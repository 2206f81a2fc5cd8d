/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of a migration run (UUIDv7, so ids sort by creation time).
pub type RunId = uuid::Uuid;

/// Identifier of an entity in the system of record.
pub type EntityId = uuid::Uuid;

/// Canonical field name -> typed value.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;
