//! Scripted collaborators and fixtures shared by unit and integration tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::state::OrchestrationState;
use crate::core::types::{SessionReport, SessionStatus, UnitKind, Verdict, WorkUnit};
use crate::engine::EngineConfig;
use crate::error::EngineError;
use crate::io::agent::{AgentClient, LaunchRequest};
use crate::io::init::ConductorPaths;
use crate::io::oracle::{Oracle, VerifyRequest};
use crate::io::prompt::PromptAssembler;
use crate::io::state_store::StateStore;

/// Build a status report.
pub fn report(
    status: SessionStatus,
    summary: Option<&str>,
    resulting_branch: Option<&str>,
) -> SessionReport {
    SessionReport {
        status,
        summary: summary.map(str::to_string),
        resulting_branch: resulting_branch.map(str::to_string),
    }
}

/// Engine config that never sleeps between polls.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        max_retries: 2,
        poll_interval: Duration::ZERO,
        max_poll_attempts: 5,
        skip_verification: false,
        repository_url: "https://github.com/acme/app".to_string(),
        model: None,
        checklist_path: None,
    }
}

fn unit(kind: UnitKind, id: &str) -> WorkUnit {
    WorkUnit {
        kind,
        id: id.to_string(),
        title: format!("Title of {id}"),
        description: String::new(),
        acceptance_context: format!("Criteria for {id}"),
        documents: Vec::new(),
    }
}

pub fn task_unit(id: &str) -> WorkUnit {
    unit(UnitKind::Task, id)
}

pub fn feature_unit(id: &str) -> WorkUnit {
    unit(UnitKind::Feature, id)
}

pub fn polish_unit(id: &str) -> WorkUnit {
    unit(UnitKind::Polish, id)
}

/// Agent client replaying scripted status sequences.
///
/// Each session's queue is consumed one report per poll; the last report
/// repeats once the queue is down to one entry. Launched sessions get ids
/// `bc-1`, `bc-2`, ... in launch order.
#[derive(Default)]
pub struct ScriptedAgentClient {
    statuses: RefCell<BTreeMap<String, VecDeque<SessionReport>>>,
    launches: RefCell<Vec<LaunchRequest>>,
    follow_ups: RefCell<Vec<(String, String)>>,
    polls: Cell<u32>,
    launch_error: RefCell<Option<String>>,
    status_error: RefCell<Option<String>>,
    follow_up_error: RefCell<Option<String>>,
}

impl ScriptedAgentClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the status sequence for `session_id`.
    pub fn script_statuses(&self, session_id: &str, reports: Vec<SessionReport>) {
        self.statuses
            .borrow_mut()
            .insert(session_id.to_string(), reports.into());
    }

    pub fn fail_launch_with(&self, message: &str) {
        *self.launch_error.borrow_mut() = Some(message.to_string());
    }

    pub fn fail_status_with(&self, message: &str) {
        *self.status_error.borrow_mut() = Some(message.to_string());
    }

    pub fn fail_follow_up_with(&self, message: &str) {
        *self.follow_up_error.borrow_mut() = Some(message.to_string());
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.launches.borrow().clone()
    }

    /// `(session_id, text)` pairs in send order.
    pub fn follow_ups(&self) -> Vec<(String, String)> {
        self.follow_ups.borrow().clone()
    }

    pub fn polls(&self) -> u32 {
        self.polls.get()
    }
}

impl AgentClient for ScriptedAgentClient {
    fn launch(&self, request: &LaunchRequest) -> Result<String> {
        if let Some(message) = self.launch_error.borrow().as_ref() {
            return Err(anyhow!("launch session failed: {message}"));
        }
        let mut launches = self.launches.borrow_mut();
        launches.push(request.clone());
        Ok(format!("bc-{}", launches.len()))
    }

    fn status(&self, session_id: &str) -> Result<SessionReport> {
        self.polls.set(self.polls.get() + 1);
        if let Some(message) = self.status_error.borrow().as_ref() {
            return Err(anyhow!("fetch session status failed: {message}"));
        }
        let mut statuses = self.statuses.borrow_mut();
        let queue = statuses
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("fetch session status failed: HTTP 404: {session_id}"))?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        next.ok_or_else(|| anyhow!("no scripted status for {session_id}"))
    }

    fn add_follow_up(&self, session_id: &str, text: &str) -> Result<()> {
        if let Some(message) = self.follow_up_error.borrow().as_ref() {
            return Err(anyhow!("add follow-up failed: {message}"));
        }
        self.follow_ups
            .borrow_mut()
            .push((session_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Oracle returning queued verdicts; fails once the queue is empty.
pub struct ScriptedOracle {
    verdicts: RefCell<VecDeque<Verdict>>,
    requests: RefCell<Vec<VerifyRequest>>,
}

impl ScriptedOracle {
    pub fn new(verdicts: Vec<Verdict>) -> Self {
        Self {
            verdicts: RefCell::new(verdicts.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<VerifyRequest> {
        self.requests.borrow().clone()
    }
}

impl Oracle for ScriptedOracle {
    fn verify(&self, request: &VerifyRequest) -> Verdict {
        self.requests.borrow_mut().push(request.clone());
        self.verdicts
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Verdict::fail("no scripted verdict left"))
    }
}

/// Deterministic prompts that echo the unit and feedback.
pub struct EchoPrompts;

impl PromptAssembler for EchoPrompts {
    fn launch_prompt(&self, unit: &WorkUnit) -> Result<String> {
        Ok(format!("launch {}", unit.key()))
    }

    fn follow_up_prompt(&self, unit: &WorkUnit, feedback_history: &[String]) -> Result<String> {
        Ok(format!(
            "follow-up {} [{}]",
            unit.key(),
            feedback_history.join(" | ")
        ))
    }
}

/// In-memory store keeping the serialized record, like the file store would.
#[derive(Default)]
pub struct MemoryStore {
    json: RefCell<Option<String>>,
    saves: Cell<u32>,
    fail_saves: Cell<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: &OrchestrationState) -> Self {
        let store = Self::new();
        *store.json.borrow_mut() = serde_json::to_string(state).ok();
        store
    }

    /// Make every later `save` fail with a persistence error.
    pub fn fail_saves(&self) {
        self.fail_saves.set(true);
    }

    pub fn saves(&self) -> u32 {
        self.saves.get()
    }

    /// Last saved state, if any.
    pub fn snapshot(&self) -> Option<OrchestrationState> {
        self.json
            .borrow()
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<OrchestrationState, EngineError> {
        match self.json.borrow().as_deref() {
            None => Ok(OrchestrationState::default()),
            Some(json) => serde_json::from_str(json).map_err(|err| EngineError::CorruptState {
                path: PathBuf::from("<memory>"),
                message: err.to_string(),
            }),
        }
    }

    fn save(&self, state: &OrchestrationState) -> Result<(), EngineError> {
        if self.fail_saves.get() {
            return Err(EngineError::Persistence {
                path: PathBuf::from("<memory>"),
                source: std::io::Error::new(ErrorKind::Other, "scripted save failure"),
            });
        }
        let json = serde_json::to_string(state).map_err(|err| EngineError::Persistence {
            path: PathBuf::from("<memory>"),
            source: std::io::Error::new(ErrorKind::InvalidData, err),
        })?;
        *self.json.borrow_mut() = Some(json);
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}

/// Temporary project root with the default document layout.
pub struct TestWorkspace {
    _temp: tempfile::TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let root = temp.path().to_path_buf();
        Ok(Self { _temp: temp, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self) -> ConductorPaths {
        ConductorPaths::new(&self.root)
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        Ok(fs::read_to_string(self.root.join(rel))?)
    }

    /// Project spec, plan and a task checklist.
    pub fn with_tasks(self, checklist: &str) -> Result<Self> {
        self.write("specs/spec.md", "# Spec\n\nThe app greets users.\n")?;
        self.write("specs/plan.md", "# Plan\n\nOne binary.\n")?;
        self.write("specs/tasks.md", checklist)?;
        Ok(self)
    }

    /// One feature directory with spec and plan.
    pub fn with_feature(self, name: &str) -> Result<Self> {
        self.write(
            &format!("specs/features/{name}/spec.md"),
            &format!("# {name}\n\nAcceptance for {name}.\n"),
        )?;
        self.write(
            &format!("specs/features/{name}/plan.md"),
            &format!("# Plan for {name}\n"),
        )?;
        Ok(self)
    }
}
