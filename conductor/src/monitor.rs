//! Poll a remote session until it reaches a terminal status.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::types::SessionStatus;
use crate::error::EngineError;
use crate::io::agent::AgentClient;

/// Summary used when a finished session reports none.
pub const DEFAULT_SUMMARY: &str = "Task execution finished.";

/// Terminal success of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSuccess {
    pub summary: String,
    pub resulting_branch: Option<String>,
}

/// Bounded poll loop over an [`AgentClient`].
pub struct Monitor<'a, A: AgentClient> {
    client: &'a A,
    interval: Duration,
    max_attempts: u32,
}

impl<'a, A: AgentClient> Monitor<'a, A> {
    pub fn new(client: &'a A, interval: Duration, max_attempts: u32) -> Self {
        Self {
            client,
            interval,
            max_attempts,
        }
    }

    /// Poll until `FINISHED`, a failure status, or the attempt cap.
    ///
    /// Transport errors are returned as [`EngineError::Transport`] and are not
    /// retried here. No sleep follows the final poll.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn await_session(&self, session_id: &str) -> Result<SessionSuccess, EngineError> {
        for attempt in 1..=self.max_attempts {
            let report = self
                .client
                .status(session_id)
                .map_err(EngineError::Transport)?;
            debug!(attempt, status = %report.status, "polled session");
            match report.status {
                SessionStatus::Finished => {
                    let summary = report
                        .summary
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(|| DEFAULT_SUMMARY.to_string());
                    info!(attempt, branch = ?report.resulting_branch, "session finished");
                    return Ok(SessionSuccess {
                        summary,
                        resulting_branch: report.resulting_branch,
                    });
                }
                status if status.is_terminal() => {
                    warn!(%status, "session ended without finishing");
                    return Err(EngineError::AgentTerminal {
                        session_id: session_id.to_string(),
                        status,
                    });
                }
                _ => {}
            }
            if attempt < self.max_attempts {
                thread::sleep(self.interval);
            }
        }
        warn!(attempts = self.max_attempts, "session polling timed out");
        Err(EngineError::PollingTimeout {
            session_id: session_id.to_string(),
            attempts: self.max_attempts,
        })
    }
}
