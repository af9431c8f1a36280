//! Per-unit workflow state machine.
//!
//! The engine owns every transition of a unit's progress record. Each
//! transition is flushed through the [`StateStore`] before the engine acts on
//! it, so a restarted process never sees state that is behind a side effect
//! already taken (a launched session, a moved lineage branch).

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::core::state::OrchestrationState;
use crate::core::transition::{
    AttemptPlan, apply_failure, apply_pass, plan_attempt, record_running,
};
use crate::core::types::{UnitKey, UnitKind, UnitStatus, WorkUnit};
use crate::error::EngineError;
use crate::io::agent::{AgentClient, LaunchRequest};
use crate::io::checklist_sync::mark_completed;
use crate::io::oracle::{Oracle, VerifyRequest};
use crate::io::prompt::PromptAssembler;
use crate::io::state_store::StateStore;
use crate::monitor::{Monitor, SessionSuccess};

/// Engine tunables, usually derived from `ConductorConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_retries: u32,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub skip_verification: bool,
    pub repository_url: String,
    pub model: Option<String>,
    /// Task checklist ticked when a task unit completes.
    pub checklist_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 60,
            skip_verification: false,
            repository_url: String::new(),
            model: None,
            checklist_path: None,
        }
    }
}

/// Terminal result of [`Engine::process_unit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Unit was completed before this call; nothing was done.
    AlreadyCompleted,
    /// Unit passed verification on attempt number `attempts`.
    Completed { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptOutcome {
    Passed { resulting_branch: Option<String> },
    Failed { feedback: String },
}

pub struct Engine<'a, S, A, O, P> {
    store: &'a S,
    agent: &'a A,
    oracle: &'a O,
    prompts: &'a P,
    config: EngineConfig,
}

impl<'a, S, A, O, P> Engine<'a, S, A, O, P>
where
    S: StateStore,
    A: AgentClient,
    O: Oracle,
    P: PromptAssembler,
{
    pub fn new(
        store: &'a S,
        agent: &'a A,
        oracle: &'a O,
        prompts: &'a P,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            agent,
            oracle,
            prompts,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Flush `state` through the store.
    pub fn save(&self, state: &OrchestrationState) -> Result<(), EngineError> {
        self.store.save(state)
    }

    /// Render the launch prompt without side effects.
    pub fn preview_launch(&self, unit: &WorkUnit) -> Result<String, EngineError> {
        self.prompts
            .launch_prompt(unit)
            .map_err(|error| EngineError::Prompt {
                unit: unit.key(),
                error,
            })
    }

    /// Drive `unit` to completion or to an exhausted retry budget.
    ///
    /// Returns without external calls for a completed unit, only re-ticking
    /// its checklist entry. Resumes a recorded session instead of launching a
    /// new one, so repeated calls after a crash launch at most one session per
    /// unit.
    #[instrument(skip_all, fields(unit = %unit.key()))]
    pub fn process_unit(
        &self,
        state: &mut OrchestrationState,
        unit: &WorkUnit,
    ) -> Result<UnitOutcome, EngineError> {
        let key = unit.key();
        loop {
            let progress = state.progress(&key).cloned().unwrap_or_default();
            let attempt = progress.retry_count + 1;
            let session_id = match plan_attempt(&progress, self.config.max_retries) {
                AttemptPlan::AlreadyCompleted => {
                    info!("already completed, skipping");
                    // Repairs a tick lost to a crash between the save and the sync.
                    self.sync_checklist(unit)?;
                    return Ok(UnitOutcome::AlreadyCompleted);
                }
                AttemptPlan::Exhausted => {
                    error!(
                        retry_count = progress.retry_count,
                        max_retries = self.config.max_retries,
                        "retry budget exhausted, stopping"
                    );
                    return Err(EngineError::RetryBudgetExceeded {
                        unit: key,
                        retries: progress.retry_count,
                        max_retries: self.config.max_retries,
                    });
                }
                AttemptPlan::Fresh => self.launch(state, unit)?,
                AttemptPlan::Resume(session_id) => {
                    info!(%session_id, "resuming recorded session");
                    if progress.status != UnitStatus::Running {
                        record_running(state.progress_mut(&key), &session_id);
                        self.store.save(state)?;
                    }
                    session_id
                }
                AttemptPlan::FollowUp(session_id) => {
                    self.follow_up(state, unit, &session_id, &progress.feedback_history)?;
                    session_id
                }
            };

            info!(attempt, %session_id, "monitoring session");
            match self.run_attempt(unit, &session_id)? {
                AttemptOutcome::Passed { resulting_branch } => {
                    let previous = apply_pass(state, &key, resulting_branch.as_deref());
                    self.store.save(state)?;
                    match previous {
                        Some(previous) => info!(
                            attempt,
                            from = %previous,
                            to = %state.lineage_branch,
                            "verified, lineage advanced"
                        ),
                        None => info!(attempt, lineage = %state.lineage_branch, "verified"),
                    }
                    self.sync_checklist(unit)?;
                    return Ok(UnitOutcome::Completed { attempts: attempt });
                }
                AttemptOutcome::Failed { feedback } => {
                    apply_failure(state.progress_mut(&key), &feedback);
                    self.store.save(state)?;
                    warn!(attempt, %feedback, "attempt failed");
                }
            }
        }
    }

    /// See [`bind_session`].
    pub fn bind_session(
        &self,
        state: &mut OrchestrationState,
        key: &UnitKey,
        session_id: &str,
    ) -> Result<bool, EngineError> {
        bind_session(self.store, state, key, session_id)
    }

    fn launch(
        &self,
        state: &mut OrchestrationState,
        unit: &WorkUnit,
    ) -> Result<String, EngineError> {
        let prompt = self.preview_launch(unit)?;
        let request = LaunchRequest {
            name: unit.display_name(),
            prompt,
            repository: self.config.repository_url.clone(),
            source_ref: state.lineage_branch.clone(),
            model: self.config.model.clone(),
        };
        info!(source_ref = %request.source_ref, "launching session");
        let session_id = self.agent.launch(&request).map_err(EngineError::Transport)?;
        record_running(state.progress_mut(&unit.key()), &session_id);
        self.store.save(state)?;
        Ok(session_id)
    }

    fn follow_up(
        &self,
        state: &mut OrchestrationState,
        unit: &WorkUnit,
        session_id: &str,
        feedback_history: &[String],
    ) -> Result<(), EngineError> {
        let text = self
            .prompts
            .follow_up_prompt(unit, feedback_history)
            .map_err(|error| EngineError::Prompt {
                unit: unit.key(),
                error,
            })?;
        info!(
            session_id,
            retry = feedback_history.len(),
            max_retries = self.config.max_retries,
            "sending follow-up"
        );
        self.agent
            .add_follow_up(session_id, &text)
            .map_err(EngineError::Transport)?;
        record_running(state.progress_mut(&unit.key()), session_id);
        self.store.save(state)
    }

    fn run_attempt(
        &self,
        unit: &WorkUnit,
        session_id: &str,
    ) -> Result<AttemptOutcome, EngineError> {
        let monitor = Monitor::new(
            self.agent,
            self.config.poll_interval,
            self.config.max_poll_attempts,
        );
        let SessionSuccess {
            summary,
            resulting_branch,
        } = match monitor.await_session(session_id) {
            Ok(success) => success,
            Err(err) if err.is_retryable() => {
                return Ok(AttemptOutcome::Failed {
                    feedback: format!("Agent session did not complete: {err}."),
                });
            }
            Err(err) => return Err(err),
        };

        if self.config.skip_verification {
            info!("verification skipped by configuration");
            return Ok(AttemptOutcome::Passed { resulting_branch });
        }

        let verdict = self.oracle.verify(&VerifyRequest {
            context: format!("{}: {}", unit.display_name(), unit.title),
            acceptance_criteria: unit.acceptance_context.clone(),
            output_summary: summary,
        });
        if verdict.passed() {
            Ok(AttemptOutcome::Passed { resulting_branch })
        } else {
            Ok(AttemptOutcome::Failed {
                feedback: verdict.feedback,
            })
        }
    }

    fn sync_checklist(&self, unit: &WorkUnit) -> Result<(), EngineError> {
        if unit.kind != UnitKind::Task {
            return Ok(());
        }
        if let Some(path) = &self.config.checklist_path {
            mark_completed(path, &unit.id)?;
        }
        Ok(())
    }
}

/// Attach `session_id` to a unit by hand so the next run resumes it.
///
/// Returns `false` without touching state when the unit is already completed.
pub fn bind_session<S: StateStore>(
    store: &S,
    state: &mut OrchestrationState,
    key: &UnitKey,
    session_id: &str,
) -> Result<bool, EngineError> {
    if state.is_completed(key) {
        warn!(unit = %key, "refusing to bind a session to a completed unit");
        return Ok(false);
    }
    record_running(state.progress_mut(key), session_id);
    store.save(state)?;
    info!(unit = %key, session_id, "session bound");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{SessionStatus, Verdict};
    use crate::test_support::{
        EchoPrompts, MemoryStore, ScriptedAgentClient, ScriptedOracle, fast_config, report,
        task_unit,
    };

    #[test]
    fn first_attempt_pass_completes_and_moves_lineage() {
        let store = MemoryStore::new();
        let agent = ScriptedAgentClient::new();
        agent.script_statuses(
            "bc-1",
            vec![report(SessionStatus::Finished, Some("done"), Some("cursor/t001"))],
        );
        let oracle = ScriptedOracle::new(vec![Verdict::pass("all good")]);
        let prompts = EchoPrompts;
        let engine = Engine::new(&store, &agent, &oracle, &prompts, fast_config());
        let mut state = OrchestrationState::new("main");

        let outcome = engine
            .process_unit(&mut state, &task_unit("T001"))
            .expect("process");

        assert_eq!(outcome, UnitOutcome::Completed { attempts: 1 });
        assert_eq!(state.lineage_branch, "cursor/t001");
        let launches = agent.launches();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].source_ref, "main");
        assert_eq!(launches[0].name, "Task T001");
        assert_eq!(store.snapshot(), Some(state));
    }

    #[test]
    fn verify_request_names_the_unit_and_carries_summary() {
        let store = MemoryStore::new();
        let agent = ScriptedAgentClient::new();
        agent.script_statuses("bc-1", vec![report(SessionStatus::Finished, None, None)]);
        let oracle = ScriptedOracle::new(vec![Verdict::pass("ok")]);
        let engine = Engine::new(&store, &agent, &oracle, &EchoPrompts, fast_config());
        let mut state = OrchestrationState::new("main");

        engine
            .process_unit(&mut state, &task_unit("T001"))
            .expect("process");

        let requests = oracle.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].context, "Task T001: Title of T001");
        assert_eq!(requests[0].acceptance_criteria, "Criteria for T001");
        assert_eq!(requests[0].output_summary, "Task execution finished.");
        assert_eq!(state.lineage_branch, "main");
    }

    #[test]
    fn skip_verification_passes_without_consulting_oracle() {
        let store = MemoryStore::new();
        let agent = ScriptedAgentClient::new();
        agent.script_statuses(
            "bc-1",
            vec![report(SessionStatus::Finished, Some("done"), Some("b1"))],
        );
        let oracle = ScriptedOracle::new(Vec::new());
        let config = EngineConfig {
            skip_verification: true,
            ..fast_config()
        };
        let engine = Engine::new(&store, &agent, &oracle, &EchoPrompts, config);
        let mut state = OrchestrationState::new("main");

        engine
            .process_unit(&mut state, &task_unit("T001"))
            .expect("process");

        assert!(oracle.requests().is_empty());
        assert_eq!(state.lineage_branch, "b1");
    }

    #[test]
    fn launch_transport_error_is_fatal_and_leaves_unit_pending() {
        let store = MemoryStore::new();
        let agent = ScriptedAgentClient::new();
        agent.fail_launch_with("HTTP 401: bad key");
        let oracle = ScriptedOracle::new(Vec::new());
        let engine = Engine::new(&store, &agent, &oracle, &EchoPrompts, fast_config());
        let mut state = OrchestrationState::new("main");

        let err = engine
            .process_unit(&mut state, &task_unit("T001"))
            .expect_err("transport");

        assert!(matches!(err, EngineError::Transport(_)));
        let key = task_unit("T001").key();
        let progress = state.progress(&key).cloned().unwrap_or_default();
        assert_eq!(progress.session_id, None);
        assert_eq!(progress.status, UnitStatus::Pending);
        assert_eq!(store.saves(), 0);
    }

    #[test]
    fn persistence_failure_after_launch_stops_the_run() {
        let store = MemoryStore::new();
        store.fail_saves();
        let agent = ScriptedAgentClient::new();
        let oracle = ScriptedOracle::new(Vec::new());
        let engine = Engine::new(&store, &agent, &oracle, &EchoPrompts, fast_config());
        let mut state = OrchestrationState::new("main");

        let err = engine
            .process_unit(&mut state, &task_unit("T001"))
            .expect_err("persistence");

        assert!(matches!(err, EngineError::Persistence { .. }));
        assert_eq!(agent.launches().len(), 1);
        assert_eq!(agent.polls(), 0);
    }

    #[test]
    fn bind_session_records_running_session() {
        let store = MemoryStore::new();
        let agent = ScriptedAgentClient::new();
        let oracle = ScriptedOracle::new(Vec::new());
        let engine = Engine::new(&store, &agent, &oracle, &EchoPrompts, fast_config());
        let mut state = OrchestrationState::new("main");
        let key = task_unit("T001").key();

        assert!(engine.bind_session(&mut state, &key, "bc-manual").expect("bind"));

        let progress = state.progress(&key).expect("progress");
        assert_eq!(progress.session_id.as_deref(), Some("bc-manual"));
        assert_eq!(progress.status, UnitStatus::Running);
        assert_eq!(store.saves(), 1);
    }

    #[test]
    fn bind_session_refuses_completed_units() {
        let store = MemoryStore::new();
        let agent = ScriptedAgentClient::new();
        let oracle = ScriptedOracle::new(Vec::new());
        let engine = Engine::new(&store, &agent, &oracle, &EchoPrompts, fast_config());
        let mut state = OrchestrationState::new("main");
        let key = task_unit("T001").key();
        state.progress_mut(&key).status = UnitStatus::Completed;

        assert!(!engine.bind_session(&mut state, &key, "bc-x").expect("bind"));
        assert_eq!(state.progress(&key).and_then(|p| p.session_id.clone()), None);
        assert_eq!(store.saves(), 0);
    }

    #[test]
    fn completed_task_re_ticks_its_checklist_without_agent_calls() {
        let temp = tempfile::tempdir().expect("tempdir");
        let checklist = temp.path().join("tasks.md");
        std::fs::write(&checklist, "- [ ] T001 First\n- [ ] T002 Second\n").expect("write");
        let store = MemoryStore::new();
        let agent = ScriptedAgentClient::new();
        let oracle = ScriptedOracle::new(Vec::new());
        let config = EngineConfig {
            checklist_path: Some(checklist.clone()),
            ..fast_config()
        };
        let engine = Engine::new(&store, &agent, &oracle, &EchoPrompts, config);
        let mut state = OrchestrationState::new("main");
        let unit = task_unit("T001");
        state.progress_mut(&unit.key()).status = UnitStatus::Completed;

        let outcome = engine.process_unit(&mut state, &unit).expect("process");

        assert_eq!(outcome, UnitOutcome::AlreadyCompleted);
        assert_eq!(
            std::fs::read_to_string(&checklist).expect("read"),
            "- [x] T001 First\n- [ ] T002 Second\n"
        );
        assert_eq!(agent.polls(), 0);
        assert!(agent.launches().is_empty());
        assert_eq!(store.saves(), 0);
    }
}
