//! Stable exit codes for conductor CLI commands.

use crate::error::EngineError;

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed: invalid config, missing documents, corrupt state, transport or persistence errors.
pub const FAILED: i32 = 1;
/// A unit exhausted its retry budget; the run stopped at that unit.
pub const ABORTED: i32 = 3;

/// Exit code for an engine error.
pub fn for_error(err: &EngineError) -> i32 {
    match err {
        EngineError::RetryBudgetExceeded { .. } => ABORTED,
        _ => FAILED,
    }
}
