//! Shared deterministic types for conductor core logic.
//!
//! These types define stable contracts between the engine, the persisted state
//! and the external collaborators. They do not perform I/O.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Scope a work unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Task,
    Feature,
    Polish,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Task => "task",
            UnitKind::Feature => "feature",
            UnitKind::Polish => "polish",
        }
    }

    /// Human label used in session names and log lines.
    pub fn label(self) -> &'static str {
        match self {
            UnitKind::Task => "Task",
            UnitKind::Feature => "Feature",
            UnitKind::Polish => "Polish",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(UnitKind::Task),
            "feature" => Ok(UnitKind::Feature),
            "polish" => Ok(UnitKind::Polish),
            other => Err(format!("unknown unit kind '{other}'")),
        }
    }
}

/// Persisted identity of a unit: `(kind, id)`, rendered as `kind:id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitKey {
    pub kind: UnitKind,
    pub id: String,
}

impl UnitKey {
    pub fn new(kind: UnitKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for UnitKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("unit key '{s}' must look like kind:id"))?;
        if id.is_empty() {
            return Err(format!("unit key '{s}' has an empty id"));
        }
        Ok(UnitKey::new(kind.parse()?, id))
    }
}

impl Serialize for UnitKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UnitKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One schedulable item, materialized on demand by the registry.
///
/// Never persisted; only its [`UnitProgress`] is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub kind: UnitKind,
    pub id: String,
    pub title: String,
    /// Free-form description shown in the launch prompt. May be empty.
    pub description: String,
    /// Opaque text handed to the oracle as acceptance criteria.
    pub acceptance_context: String,
    /// Documents the launch prompt is assembled from, in order.
    pub documents: Vec<PathBuf>,
}

impl WorkUnit {
    pub fn key(&self) -> UnitKey {
        UnitKey::new(self.kind, self.id.clone())
    }

    /// Session name, e.g. `Task T001`.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.kind.label(), self.id)
    }
}

/// Per-unit lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl UnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Running => "running",
            UnitStatus::Completed => "completed",
            UnitStatus::Failed => "failed",
        }
    }
}

/// Persisted progress record for one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitProgress {
    pub status: UnitStatus,
    pub retry_count: u32,
    pub session_id: Option<String>,
    pub last_feedback: Option<String>,
    /// Every failed attempt's feedback, oldest first. Replayed in follow-ups.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub feedback_history: Vec<String>,
}

/// Which staged scope is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Features,
    Polish,
    Complete,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Features => "features",
            Phase::Polish => "polish",
            Phase::Complete => "complete",
        }
    }
}

/// Remote session status as reported by the agent service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Creating,
    Running,
    Finished,
    Failed,
    Stopped,
    Deleted,
    /// Any status this client does not know; treated as non-terminal.
    #[serde(other)]
    Unknown,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Finished
                | SessionStatus::Failed
                | SessionStatus::Stopped
                | SessionStatus::Deleted
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Creating => "CREATING",
            SessionStatus::Running => "RUNNING",
            SessionStatus::Finished => "FINISHED",
            SessionStatus::Failed => "FAILED",
            SessionStatus::Stopped => "STOPPED",
            SessionStatus::Deleted => "DELETED",
            SessionStatus::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// One status observation of a remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub status: SessionStatus,
    pub summary: Option<String>,
    pub resulting_branch: Option<String>,
}

/// Oracle judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Pass,
    Fail,
}

/// Oracle verdict: pass/fail plus differential feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub feedback: String,
}

impl Verdict {
    pub fn pass(feedback: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Pass,
            feedback: feedback.into(),
        }
    }

    pub fn fail(feedback: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Fail,
            feedback: feedback.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == VerdictStatus::Pass
    }
}
