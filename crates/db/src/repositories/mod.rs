//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods.
//! Reads take `&PgPool`; writes that must join a caller's transaction take
//! `&mut PgConnection`.

pub mod entity_repo;
pub mod migration_run_repo;
pub mod run_entry_repo;
