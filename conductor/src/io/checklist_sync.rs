//! Write task completion back into the markdown checklist.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

use crate::core::checklist::set_task_done;
use crate::error::EngineError;

/// Tick `task_id` in the checklist at `path`.
///
/// Returns whether the file changed. A missing checklist only warns: the
/// persisted state, not the checklist, is the source of truth.
pub fn mark_completed(path: &Path, task_id: &str) -> Result<bool, EngineError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), task_id, "checklist not found, skipping sync");
            return Ok(false);
        }
        Err(err) => {
            return Err(EngineError::ChecklistSync {
                path: path.to_path_buf(),
                error: anyhow::Error::new(err).context("read checklist"),
            });
        }
    };
    let Some(updated) = set_task_done(&content, task_id, true) else {
        return Ok(false);
    };
    fs::write(path, updated)
        .context("write checklist")
        .map_err(|error| EngineError::ChecklistSync {
            path: path.to_path_buf(),
            error,
        })?;
    info!(path = %path.display(), task_id, "checklist updated");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_the_task_in_place() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.md");
        fs::write(&path, "- [ ] T001 One\n- [ ] T002 Two\n").expect("write");

        assert!(mark_completed(&path, "T001").expect("sync"));
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "- [x] T001 One\n- [ ] T002 Two\n"
        );
        assert!(!mark_completed(&path, "T001").expect("second sync"));
    }

    #[test]
    fn missing_checklist_is_not_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let changed = mark_completed(&temp.path().join("tasks.md"), "T001").expect("sync");
        assert!(!changed);
    }
}
