//! Typed error taxonomy for the workflow engine.
//!
//! Only [`EngineError::AgentTerminal`] and [`EngineError::PollingTimeout`] are
//! recoverable: the engine counts them as a failed attempt. Everything else
//! stops the run and leaves the persisted state at the last confirmed step.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::{Phase, SessionStatus, UnitKey};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("state file {path} is corrupt: {message}")]
    CorruptState { path: PathBuf, message: String },

    #[error("failed to persist state to {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing required specification file {path} for {scope}")]
    MissingSpecification { scope: String, path: PathBuf },

    #[error("session {session_id} ended with terminal status {status}")]
    AgentTerminal {
        session_id: String,
        status: SessionStatus,
    },

    #[error("session {session_id} reached no terminal status after {attempts} polls")]
    PollingTimeout { session_id: String, attempts: u32 },

    #[error("{unit} still failing after {retries} retries (max {max_retries})")]
    RetryBudgetExceeded {
        unit: UnitKey,
        retries: u32,
        max_retries: u32,
    },

    #[error("{unit} cannot run while the staged run is in the {} phase", .phase.as_str())]
    PhaseOrder { unit: UnitKey, phase: Phase },

    #[error("agent service request failed: {0:#}")]
    Transport(anyhow::Error),

    #[error("failed to assemble prompt for {unit}: {error:#}")]
    Prompt { unit: UnitKey, error: anyhow::Error },

    #[error("failed to sync checklist {path}: {error:#}")]
    ChecklistSync { path: PathBuf, error: anyhow::Error },
}

impl EngineError {
    /// True when the failure counts as one failed attempt rather than a crash.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::AgentTerminal { .. } | EngineError::PollingTimeout { .. }
        )
    }
}
