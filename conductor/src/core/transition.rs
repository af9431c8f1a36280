//! Engine-owned state transitions for a single unit.
//!
//! Every function here mutates in-memory state only; the engine is responsible
//! for flushing the result before acting on it.

use crate::core::state::OrchestrationState;
use crate::core::types::{Phase, UnitKey, UnitKind, UnitProgress, UnitStatus};

/// What the engine must do to start the next attempt of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptPlan {
    /// Unit is terminal-complete; no external calls.
    AlreadyCompleted,
    /// `retry_count` exceeds the budget; the run must abort.
    Exhausted,
    /// No session recorded: launch a new one from the lineage branch.
    Fresh,
    /// A session is recorded but was never judged: keep monitoring it.
    Resume(String),
    /// Previous attempt failed verification: attach feedback to the session.
    FollowUp(String),
}

/// Decide the next attempt from persisted progress alone.
///
/// A recorded session is never re-launched, which keeps the launch side effect
/// at most once per unit across restarts.
pub fn plan_attempt(progress: &UnitProgress, max_retries: u32) -> AttemptPlan {
    if progress.status == UnitStatus::Completed {
        return AttemptPlan::AlreadyCompleted;
    }
    if progress.retry_count > max_retries {
        return AttemptPlan::Exhausted;
    }
    match &progress.session_id {
        None => AttemptPlan::Fresh,
        Some(id) if progress.status == UnitStatus::Running || progress.retry_count == 0 => {
            AttemptPlan::Resume(id.clone())
        }
        Some(id) => AttemptPlan::FollowUp(id.clone()),
    }
}

/// Whether a `kind` unit may run while the staged run is in `phase`.
///
/// Tasks sit outside the staged pipeline. Features run only in the features
/// phase, and polish only once every feature is complete.
pub fn phase_admits(phase: Phase, kind: UnitKind) -> bool {
    match kind {
        UnitKind::Task => true,
        UnitKind::Feature => phase == Phase::Features,
        UnitKind::Polish => matches!(phase, Phase::Polish | Phase::Complete),
    }
}

/// Record that `session_id` is now working on the unit.
pub fn record_running(progress: &mut UnitProgress, session_id: &str) {
    progress.session_id = Some(session_id.to_string());
    progress.status = UnitStatus::Running;
}

/// Apply a verified success. Returns the previous lineage branch when it moved.
///
/// Completion is monotone: a unit that is already completed is left untouched
/// and never moves lineage again.
pub fn apply_pass(
    state: &mut OrchestrationState,
    key: &UnitKey,
    resulting_branch: Option<&str>,
) -> Option<String> {
    let progress = state.progress_mut(key);
    if progress.status == UnitStatus::Completed {
        return None;
    }
    progress.status = UnitStatus::Completed;

    let branch = resulting_branch.map(str::trim).filter(|b| !b.is_empty())?;
    if branch == state.lineage_branch {
        return None;
    }
    Some(std::mem::replace(
        &mut state.lineage_branch,
        branch.to_string(),
    ))
}

/// Apply a failed attempt (oracle fail, terminal session, or polling timeout).
pub fn apply_failure(progress: &mut UnitProgress, feedback: &str) {
    progress.retry_count += 1;
    progress.status = UnitStatus::Failed;
    progress.last_feedback = Some(feedback.to_string());
    progress.feedback_history.push(feedback.to_string());
}
