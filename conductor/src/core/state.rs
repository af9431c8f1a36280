//! Process-wide orchestration aggregate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{Phase, UnitKey, UnitProgress, UnitStatus};

pub const DEFAULT_LINEAGE_BRANCH: &str = "main";

/// Persisted orchestration record (`.conductor/state.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationState {
    /// Branch the next launched session builds from. Advances only on verified success.
    pub lineage_branch: String,
    /// Active staged scope.
    pub current_phase: Phase,
    /// Progress per unit, keyed by `kind:id`.
    pub units: BTreeMap<UnitKey, UnitProgress>,
}

impl Default for OrchestrationState {
    fn default() -> Self {
        Self::new(DEFAULT_LINEAGE_BRANCH)
    }
}

impl OrchestrationState {
    pub fn new(lineage_branch: impl Into<String>) -> Self {
        Self {
            lineage_branch: lineage_branch.into(),
            current_phase: Phase::Features,
            units: BTreeMap::new(),
        }
    }

    pub fn progress(&self, key: &UnitKey) -> Option<&UnitProgress> {
        self.units.get(key)
    }

    /// Progress for `key`, inserting a pending record if absent.
    pub fn progress_mut(&mut self, key: &UnitKey) -> &mut UnitProgress {
        self.units.entry(key.clone()).or_default()
    }

    pub fn is_completed(&self, key: &UnitKey) -> bool {
        self.progress(key)
            .is_some_and(|p| p.status == UnitStatus::Completed)
    }
}
