//! Scope iteration: drive every unit of a scope, and stage features before polish.

use tracing::{info, warn};

use crate::core::state::OrchestrationState;
use crate::core::transition::phase_admits;
use crate::core::types::{Phase, UnitKey, UnitKind, WorkUnit};
use crate::engine::{Engine, UnitOutcome};
use crate::error::EngineError;
use crate::io::agent::AgentClient;
use crate::io::oracle::Oracle;
use crate::io::prompt::PromptAssembler;
use crate::io::registry::Registry;
use crate::io::state_store::StateStore;

/// Summary of a scope run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Units completed during this run, in order.
    pub completed: Vec<UnitKey>,
    /// Units that were already completed before this run.
    pub skipped: Vec<UnitKey>,
}

impl RunReport {
    fn absorb(&mut self, other: RunReport) {
        self.completed.extend(other.completed);
        self.skipped.extend(other.skipped);
    }
}

/// Process `units` in order, stopping at the first fatal error.
///
/// A unit is never started before the previous one reached a terminal outcome.
pub fn run_units<S, A, O, P>(
    engine: &Engine<'_, S, A, O, P>,
    state: &mut OrchestrationState,
    units: &[WorkUnit],
) -> Result<RunReport, EngineError>
where
    S: StateStore,
    A: AgentClient,
    O: Oracle,
    P: PromptAssembler,
{
    let mut report = RunReport::default();
    for unit in units {
        info!(unit = %unit.key(), title = %unit.title, "next unit");
        match engine.process_unit(state, unit)? {
            UnitOutcome::AlreadyCompleted => report.skipped.push(unit.key()),
            UnitOutcome::Completed { .. } => report.completed.push(unit.key()),
        }
    }
    Ok(report)
}

/// One selected unit. Refused when it would run out of staged phase order.
pub fn run_single<S, A, O, P>(
    engine: &Engine<'_, S, A, O, P>,
    state: &mut OrchestrationState,
    unit: &WorkUnit,
) -> Result<RunReport, EngineError>
where
    S: StateStore,
    A: AgentClient,
    O: Oracle,
    P: PromptAssembler,
{
    let phase = state.current_phase;
    if !phase_admits(phase, unit.kind) {
        warn!(unit = %unit.key(), phase = phase.as_str(), "unit is out of phase order");
        return Err(EngineError::PhaseOrder {
            unit: unit.key(),
            phase,
        });
    }
    run_units(engine, state, std::slice::from_ref(unit))
}

/// Open checklist tasks, in file order. Independent of the staged phase.
pub fn run_tasks<S, A, O, P>(
    engine: &Engine<'_, S, A, O, P>,
    state: &mut OrchestrationState,
    registry: &Registry,
) -> Result<RunReport, EngineError>
where
    S: StateStore,
    A: AgentClient,
    O: Oracle,
    P: PromptAssembler,
{
    let units = registry.units(UnitKind::Task)?;
    if units.is_empty() {
        info!("no pending tasks to process");
    }
    run_units(engine, state, &units)
}

/// Features, then polish, then complete. Each phase flip is persisted.
///
/// Re-running after completion is a no-op.
pub fn run_staged<S, A, O, P>(
    engine: &Engine<'_, S, A, O, P>,
    state: &mut OrchestrationState,
    registry: &Registry,
) -> Result<RunReport, EngineError>
where
    S: StateStore,
    A: AgentClient,
    O: Oracle,
    P: PromptAssembler,
{
    let mut report = RunReport::default();
    loop {
        let (kind, next) = match state.current_phase {
            Phase::Features => (UnitKind::Feature, Phase::Polish),
            Phase::Polish => (UnitKind::Polish, Phase::Complete),
            Phase::Complete => {
                info!(lineage = %state.lineage_branch, "all phases complete");
                return Ok(report);
            }
        };
        info!(phase = state.current_phase.as_str(), "starting phase");
        let units = registry.units(kind)?;
        report.absorb(run_units(engine, state, &units)?);

        state.current_phase = next;
        engine.save(state)?;
        info!(phase = next.as_str(), "phase advanced");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{SessionStatus, UnitStatus, Verdict};
    use crate::test_support::{
        EchoPrompts, MemoryStore, ScriptedAgentClient, ScriptedOracle, fast_config,
        feature_unit, polish_unit, report, task_unit,
    };

    #[test]
    fn run_units_skips_completed_and_reports_order() {
        let store = MemoryStore::new();
        let agent = ScriptedAgentClient::new();
        agent.script_statuses("bc-1", vec![report(SessionStatus::Finished, None, Some("b2"))]);
        let oracle = ScriptedOracle::new(vec![Verdict::pass("ok")]);
        let engine = Engine::new(&store, &agent, &oracle, &EchoPrompts, fast_config());
        let mut state = OrchestrationState::new("main");
        let units = vec![task_unit("T001"), task_unit("T002")];
        state.progress_mut(&units[0].key()).status = UnitStatus::Completed;

        let run = run_units(&engine, &mut state, &units).expect("run");

        assert_eq!(run.skipped, vec![units[0].key()]);
        assert_eq!(run.completed, vec![units[1].key()]);
        assert_eq!(agent.launches().len(), 1);
    }

    /// A unit that exhausts its budget stops the run before later units start.
    #[test]
    fn run_units_stops_at_first_exhausted_unit() {
        let store = MemoryStore::new();
        let agent = ScriptedAgentClient::new();
        agent.script_statuses("bc-1", vec![report(SessionStatus::Finished, None, None)]);
        let oracle = ScriptedOracle::new(vec![
            Verdict::fail("a"),
            Verdict::fail("b"),
            Verdict::fail("c"),
        ]);
        let engine = Engine::new(&store, &agent, &oracle, &EchoPrompts, fast_config());
        let mut state = OrchestrationState::new("main");
        let units = vec![task_unit("T001"), task_unit("T002")];

        let err = run_units(&engine, &mut state, &units).expect_err("exhausted");

        assert!(matches!(err, EngineError::RetryBudgetExceeded { .. }));
        assert_eq!(agent.launches().len(), 1);
        assert!(state.progress(&units[1].key()).is_none());
    }

    #[test]
    fn single_polish_unit_is_refused_during_features() {
        let store = MemoryStore::new();
        let agent = ScriptedAgentClient::new();
        let oracle = ScriptedOracle::new(Vec::new());
        let engine = Engine::new(&store, &agent, &oracle, &EchoPrompts, fast_config());
        let mut state = OrchestrationState::new("main");

        let err = run_single(&engine, &mut state, &polish_unit("logs")).expect_err("refused");

        assert!(matches!(
            err,
            EngineError::PhaseOrder { phase: Phase::Features, .. }
        ));
        assert!(agent.launches().is_empty());
        assert_eq!(store.saves(), 0);
        assert_eq!(state.lineage_branch, "main");
    }

    #[test]
    fn single_feature_unit_is_refused_after_features_phase() {
        let store = MemoryStore::new();
        let agent = ScriptedAgentClient::new();
        let oracle = ScriptedOracle::new(Vec::new());
        let engine = Engine::new(&store, &agent, &oracle, &EchoPrompts, fast_config());
        for phase in [Phase::Polish, Phase::Complete] {
            let mut state = OrchestrationState::new("main");
            state.current_phase = phase;

            let err = run_single(&engine, &mut state, &feature_unit("001-auth"))
                .expect_err("refused");

            assert!(matches!(err, EngineError::PhaseOrder { .. }));
        }
        assert!(agent.launches().is_empty());
    }

    #[test]
    fn single_units_in_phase_run() {
        let store = MemoryStore::new();
        let agent = ScriptedAgentClient::new();
        agent.script_statuses("bc-1", vec![report(SessionStatus::Finished, None, Some("b1"))]);
        agent.script_statuses("bc-2", vec![report(SessionStatus::Finished, None, Some("b2"))]);
        let oracle = ScriptedOracle::new(vec![Verdict::pass("ok"), Verdict::pass("ok")]);
        let engine = Engine::new(&store, &agent, &oracle, &EchoPrompts, fast_config());
        let mut state = OrchestrationState::new("main");
        state.current_phase = Phase::Polish;

        let polish = run_single(&engine, &mut state, &polish_unit("logs")).expect("polish");
        let task = run_single(&engine, &mut state, &task_unit("T001")).expect("task");

        assert_eq!(polish.completed, vec![polish_unit("logs").key()]);
        assert_eq!(task.completed, vec![task_unit("T001").key()]);
        assert_eq!(state.lineage_branch, "b2");
    }
}
