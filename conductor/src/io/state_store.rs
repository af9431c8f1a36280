//! Durable storage for [`OrchestrationState`].

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::state::OrchestrationState;
use crate::error::EngineError;

/// Persistence port for the orchestration record.
///
/// `save` must be atomic from the caller's perspective: a reader never observes
/// a partially written record.
pub trait StateStore {
    fn load(&self) -> Result<OrchestrationState, EngineError>;
    fn save(&self, state: &OrchestrationState) -> Result<(), EngineError>;
}

/// Pretty-printed JSON file written via temp file + fsync + rename.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    default_branch: String,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>, default_branch: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            default_branch: default_branch.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    /// A missing file yields a fresh state; an unreadable one is never reset.
    fn load(&self) -> Result<OrchestrationState, EngineError> {
        debug!(path = %self.path.display(), "loading orchestration state");
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(branch = %self.default_branch, "no state file, starting fresh");
                return Ok(OrchestrationState::new(self.default_branch.clone()));
            }
            Err(err) => {
                return Err(EngineError::CorruptState {
                    path: self.path.clone(),
                    message: format!("read failed: {err}"),
                });
            }
        };
        let state: OrchestrationState =
            serde_json::from_str(&contents).map_err(|err| EngineError::CorruptState {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        debug!(
            lineage = %state.lineage_branch,
            phase = state.current_phase.as_str(),
            units = state.units.len(),
            "orchestration state loaded"
        );
        Ok(state)
    }

    fn save(&self, state: &OrchestrationState) -> Result<(), EngineError> {
        debug!(path = %self.path.display(), lineage = %state.lineage_branch, "writing orchestration state");
        let mut buf = serde_json::to_string_pretty(state).map_err(|err| {
            EngineError::Persistence {
                path: self.path.clone(),
                source: std::io::Error::new(ErrorKind::InvalidData, err),
            }
        })?;
        buf.push('\n');
        write_atomic(&self.path, &buf).map_err(|source| EngineError::Persistence {
            path: self.path.clone(),
            source,
        })
    }
}

fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
}
