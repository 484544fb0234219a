//! Durable processing state.
//!
//! `ProcessingState` is the persisted record, `StateHandle` is the single
//! lock-guarded owner shared by concurrent workers, and `StateStore`
//! persists snapshots with a backup of the previous version.

mod handle;
mod store;
mod types;

use std::path::PathBuf;

use thiserror::Error;

pub use handle::StateHandle;
pub use store::{backup_path, JsonStateStore, StateStore};
pub use types::*;

/// Errors that can occur while persisting state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to create state directory: {path}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to back up state file {path}")]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write state file {path}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialization(String),

    #[error("State invariant violated: {0}")]
    InvariantViolation(String),

    #[error("State save task failed: {0}")]
    SaveTask(String),
}
