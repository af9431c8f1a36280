//! Markdown task checklist parsing (`- [ ] T001 Title`).

use std::sync::LazyLock;

use regex::Regex;

static TASK_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*- \[([ xX])\] (T\d+)\b[:\s]*(.*)$").expect("task line regex is valid")
});

const DESCRIPTION_PREFIX: &str = "- Description:";

/// One checklist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub done: bool,
}

/// Parse every task entry in file order.
///
/// A `- Description: ...` line directly below a task becomes its description.
pub fn parse_tasks(content: &str) -> Vec<ChecklistTask> {
    let lines: Vec<&str> = content.lines().collect();
    let mut tasks = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = TASK_LINE_RE.captures(line) else {
            continue;
        };
        let description = lines
            .get(i + 1)
            .map(|next| next.trim())
            .and_then(|next| next.strip_prefix(DESCRIPTION_PREFIX))
            .map(|d| d.trim().to_string())
            .unwrap_or_default();
        tasks.push(ChecklistTask {
            id: caps[2].to_string(),
            title: caps[3].trim().to_string(),
            description,
            done: !caps[1].trim().is_empty(),
        });
    }
    tasks
}

/// Set the checkbox of `task_id`. Returns `None` when nothing changed.
pub fn set_task_done(content: &str, task_id: &str, done: bool) -> Option<String> {
    let pattern = format!(r"(?m)^(\s*- )\[[ xX]\]( {}\b)", regex::escape(task_id));
    let re = Regex::new(&pattern).ok()?;
    let marker = if done { "[x]" } else { "[ ]" };
    let updated = re.replace_all(content, format!("${{1}}{marker}${{2}}"));
    (updated != content).then(|| updated.into_owned())
}
