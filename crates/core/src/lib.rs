//! Pure logic for the Quick Sync legacy migration engine.
//!
//! Nothing in this crate touches a database, the network or the clock of a
//! running server beyond `Utc::now()`. Storage lives in `quicksync-db` and the
//! orchestration of a run in `quicksync-pipeline`.

pub mod diff;
pub mod entity;
pub mod error;
pub mod format;
pub mod hashing;
pub mod mapper;
pub mod pagination;
pub mod plan;
pub mod profile;
pub mod reconcile;
pub mod resolve;
pub mod run;
pub mod types;
