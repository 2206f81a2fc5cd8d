//! Database row structs and their conversions to the core types.
//!
//! Each submodule contains a `FromRow` struct matching the table row and a
//! `TryFrom` into the matching `quicksync_core` type. Text-encoded enums
//! that fail to parse surface as [`crate::error::StoreError::Decode`].

pub mod entity;
pub mod migration_run;
pub mod run_entry;
