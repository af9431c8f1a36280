//! Prompt assembly for launches, follow-ups and verification.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::types::WorkUnit;
use crate::io::oracle::VerifyRequest;

const LAUNCH_TEMPLATE: &str = include_str!("prompts/launch.md");
const FOLLOW_UP_TEMPLATE: &str = include_str!("prompts/follow_up.md");
const VERIFY_TEMPLATE: &str = include_str!("prompts/verify.md");

const NO_FEEDBACK: &str = "No feedback provided.";

/// Builds the text sent to the agent service for a unit.
pub trait PromptAssembler {
    fn launch_prompt(&self, unit: &WorkUnit) -> Result<String>;
    /// Follow-up text: newest feedback first, then the full original assignment.
    fn follow_up_prompt(&self, unit: &WorkUnit, feedback_history: &[String]) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct DocumentContext {
    name: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct UnitContext<'a> {
    id: &'a str,
    title: &'a str,
    description: &'a str,
}

/// minijinja templates over the unit's documents, read at render time.
pub struct TemplatePrompts {
    env: Environment<'static>,
    root: PathBuf,
}

impl TemplatePrompts {
    /// Document paths are resolved against `root` when relative.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.add_template("launch", LAUNCH_TEMPLATE)
            .context("load launch template")?;
        env.add_template("follow_up", FOLLOW_UP_TEMPLATE)
            .context("load follow-up template")?;
        Ok(Self {
            env,
            root: root.into(),
        })
    }

    fn read_document(&self, path: &Path) -> Result<DocumentContext> {
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let content = fs::read_to_string(&full)
            .with_context(|| format!("read document {}", full.display()))?;
        Ok(DocumentContext {
            name: document_label(path),
            content: content.trim().to_string(),
        })
    }
}

impl PromptAssembler for TemplatePrompts {
    fn launch_prompt(&self, unit: &WorkUnit) -> Result<String> {
        let documents = unit
            .documents
            .iter()
            .map(|path| self.read_document(path))
            .collect::<Result<Vec<_>>>()?;
        debug!(unit = %unit.key(), documents = documents.len(), "rendering launch prompt");
        let rendered = self.env.get_template("launch")?.render(context! {
            kind => unit.kind.as_str(),
            documents => documents,
            unit => UnitContext {
                id: &unit.id,
                title: &unit.title,
                description: unit.description.trim(),
            },
        })?;
        Ok(rendered.trim().to_string())
    }

    fn follow_up_prompt(&self, unit: &WorkUnit, feedback_history: &[String]) -> Result<String> {
        let assignment = self.launch_prompt(unit)?;
        let (latest, earlier) = match feedback_history.split_last() {
            Some((latest, earlier)) => (latest.trim(), earlier),
            None => (NO_FEEDBACK, &[][..]),
        };
        let latest = if latest.is_empty() { NO_FEEDBACK } else { latest };
        let rendered = self.env.get_template("follow_up")?.render(context! {
            latest => latest,
            earlier => earlier.iter().map(|f| f.trim()).collect::<Vec<_>>(),
            assignment => assignment,
        })?;
        Ok(rendered.trim().to_string())
    }
}

/// Render the verification prompt sent to a chat-completion oracle.
pub fn verify_prompt(request: &VerifyRequest) -> Result<String> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    let rendered = env
        .render_str(
            VERIFY_TEMPLATE,
            context! {
                context => request.context.trim(),
                acceptance_criteria => request.acceptance_criteria.trim(),
                output_summary => request.output_summary.trim(),
            },
        )
        .context("render verify template")?;
    Ok(rendered.trim().to_string())
}

/// `specs/features/001-auth/plan.md` -> `PLAN (001-auth)`, `specs/spec.md` -> `SPEC`.
fn document_label(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_uppercase())
        .unwrap_or_else(|| "DOCUMENT".to_string());
    match path
        .parent()
        .and_then(Path::file_name)
        .map(|p| p.to_string_lossy().into_owned())
    {
        Some(dir) if dir != "specs" && !dir.is_empty() => format!("{stem} ({dir})"),
        _ => stem,
    }
}
