//! State persistence.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{ProcessingState, StateError, STATE_VERSION};

/// Storage backend for [`ProcessingState`].
pub trait StateStore: Send + Sync {
    /// Load the persisted state.
    ///
    /// A missing, unreadable or structurally invalid file yields the default
    /// empty state. Unmonitor decisions already pushed upstream are
    /// rediscovered from the remote monitored flags on the next scan.
    fn load(&self) -> ProcessingState;

    /// Persist a snapshot. With `rotate_backup` the previous version is first
    /// copied aside.
    fn save(&self, state: &ProcessingState, rotate_backup: bool) -> Result<(), StateError>;
}

/// `<file>.bak` next to the state file.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// JSON file store with atomic replace and single-generation backup.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn render(state: &ProcessingState) -> Result<String, StateError> {
        let mut value =
            serde_json::to_value(state).map_err(|e| StateError::Serialization(e.to_string()))?;
        let summary = serde_json::to_value(state.summary())
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        if let Some(object) = value.as_object_mut() {
            object.insert("summary".to_string(), summary);
        }
        serde_json::to_string_pretty(&value).map_err(|e| StateError::Serialization(e.to_string()))
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> ProcessingState {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No state file found, starting fresh");
                return ProcessingState::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read state file, starting fresh");
                return ProcessingState::new();
            }
        };

        match serde_json::from_str::<ProcessingState>(&raw) {
            Ok(mut state) => {
                state.normalize();
                debug!(
                    path = %self.path.display(),
                    version = %state.metadata.version,
                    "Loaded state"
                );
                state
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State file is corrupt, starting fresh"
                );
                ProcessingState::new()
            }
        }
    }

    fn save(&self, state: &ProcessingState, rotate_backup: bool) -> Result<(), StateError> {
        state.check_invariants()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StateError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut state = state.clone();
        state.metadata.version = STATE_VERSION.to_string();
        let body = Self::render(&state)?;

        if rotate_backup && self.path.exists() {
            let backup = backup_path(&self.path);
            fs::copy(&self.path, &backup).map_err(|source| StateError::BackupFailed {
                path: backup.clone(),
                source,
            })?;
            debug!(backup = %backup.display(), "Rotated state backup");
        }

        let tmp = temp_path(&self.path);
        fs::write(&tmp, body).map_err(|source| StateError::WriteFailed {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| StateError::WriteFailed {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = %self.path.display(), "Saved state");
        Ok(())
    }
}
