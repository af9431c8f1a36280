//! Work Unit Registry: ordered units per scope, materialized from disk on demand.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::checklist::{ChecklistTask, parse_tasks};
use crate::core::types::{UnitKind, WorkUnit};
use crate::error::EngineError;
use crate::io::config::{ConductorConfig, PolishPhaseConfig};
use crate::io::init::ConductorPaths;

/// One scope's unit strategy.
pub trait UnitSource {
    /// Units still to be worked on, in declared order.
    fn units(&self) -> Result<Vec<WorkUnit>, EngineError>;

    /// Look up a single unit by id.
    fn find(&self, id: &str) -> Result<Option<WorkUnit>, EngineError> {
        Ok(self.units()?.into_iter().find(|u| u.id == id))
    }
}

/// Checklist tasks sharing one project-wide spec and plan.
pub struct TaskSource {
    root: PathBuf,
    spec: PathBuf,
    plan: PathBuf,
    tasks: PathBuf,
}

/// One feature per subdirectory of the features directory.
pub struct FeatureSource {
    root: PathBuf,
    features_dir: PathBuf,
}

/// Global polish passes applied after every feature is complete.
pub struct PolishSource {
    root: PathBuf,
    spec: PathBuf,
    plan: PathBuf,
    phases: Vec<PolishPhaseConfig>,
}

const BUILTIN_POLISH: &[(&str, &str)] = &[
    (
        "logs",
        "Add structured, leveled logging to every component so an operator can follow a run end to end.",
    ),
    (
        "errors",
        "Replace silent or generic failures with typed errors and clear, actionable messages that name the failing input.",
    ),
    (
        "hinting",
        "Make types explicit on every public interface and document each public item.",
    ),
    (
        "tests",
        "Raise test coverage for core behaviour and edge cases. The full test suite must pass.",
    ),
];

/// Built-in polish phases in execution order.
pub fn default_polish_phases() -> Vec<PolishPhaseConfig> {
    BUILTIN_POLISH
        .iter()
        .map(|(name, goal)| PolishPhaseConfig {
            name: (*name).to_string(),
            goal: (*goal).to_string(),
        })
        .collect()
}

fn require_file(scope: &str, full: &Path) -> Result<(), EngineError> {
    if full.is_file() {
        Ok(())
    } else {
        Err(EngineError::MissingSpecification {
            scope: scope.to_string(),
            path: full.to_path_buf(),
        })
    }
}

fn read_required(scope: &str, full: &Path) -> Result<String, EngineError> {
    require_file(scope, full)?;
    fs::read_to_string(full).map_err(|_| EngineError::MissingSpecification {
        scope: scope.to_string(),
        path: full.to_path_buf(),
    })
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

impl TaskSource {
    fn checklist(&self) -> Result<(String, Vec<ChecklistTask>), EngineError> {
        let spec = resolve(&self.root, &self.spec);
        let acceptance = read_required("tasks", &spec)?;
        require_file("tasks", &resolve(&self.root, &self.plan))?;
        let content = read_required("tasks", &resolve(&self.root, &self.tasks))?;
        Ok((acceptance, parse_tasks(&content)))
    }

    fn to_unit(&self, task: ChecklistTask, acceptance: &str) -> WorkUnit {
        WorkUnit {
            kind: UnitKind::Task,
            id: task.id,
            title: task.title,
            description: task.description,
            acceptance_context: acceptance.to_string(),
            documents: vec![self.spec.clone(), self.plan.clone()],
        }
    }
}

impl UnitSource for TaskSource {
    fn units(&self) -> Result<Vec<WorkUnit>, EngineError> {
        let (acceptance, tasks) = self.checklist()?;
        let units: Vec<WorkUnit> = tasks
            .into_iter()
            .filter(|t| !t.done)
            .map(|t| self.to_unit(t, &acceptance))
            .collect();
        debug!(open = units.len(), "task checklist loaded");
        Ok(units)
    }

    /// Checked-off tasks are still addressable by id.
    fn find(&self, id: &str) -> Result<Option<WorkUnit>, EngineError> {
        let (acceptance, tasks) = self.checklist()?;
        Ok(tasks
            .into_iter()
            .find(|t| t.id == id)
            .map(|t| self.to_unit(t, &acceptance)))
    }
}

impl UnitSource for FeatureSource {
    fn units(&self) -> Result<Vec<WorkUnit>, EngineError> {
        let dir = resolve(&self.root, &self.features_dir);
        // Missing directory is fatal; an existing empty one means zero features.
        let entries = fs::read_dir(&dir).map_err(|err| {
            warn!(dir = %dir.display(), %err, "features directory unreadable");
            EngineError::MissingSpecification {
                scope: "features".to_string(),
                path: dir.clone(),
            }
        })?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();

        let mut units = Vec::with_capacity(names.len());
        for name in names {
            let spec = self.features_dir.join(&name).join("spec.md");
            let plan = self.features_dir.join(&name).join("plan.md");
            let scope = format!("feature {name}");
            let acceptance = read_required(&scope, &resolve(&self.root, &spec))?;
            require_file(&scope, &resolve(&self.root, &plan))?;
            units.push(WorkUnit {
                kind: UnitKind::Feature,
                title: name.clone(),
                id: name,
                description: String::new(),
                acceptance_context: acceptance,
                documents: vec![spec, plan],
            });
        }
        debug!(features = units.len(), dir = %dir.display(), "features discovered");
        Ok(units)
    }
}

impl UnitSource for PolishSource {
    /// Project spec and plan are included when present; polish never requires them.
    fn units(&self) -> Result<Vec<WorkUnit>, EngineError> {
        let documents: Vec<PathBuf> = [&self.spec, &self.plan]
            .into_iter()
            .filter(|p| resolve(&self.root, p).is_file())
            .cloned()
            .collect();
        Ok(self
            .phases
            .iter()
            .map(|phase| WorkUnit {
                kind: UnitKind::Polish,
                id: phase.name.clone(),
                title: format!("{} polish", phase.name),
                description: phase.goal.clone(),
                acceptance_context: phase.goal.clone(),
                documents: documents.clone(),
            })
            .collect())
    }
}

/// Dispatches to the source registered for each [`UnitKind`].
pub struct Registry {
    tasks: Box<dyn UnitSource>,
    features: Box<dyn UnitSource>,
    polish: Box<dyn UnitSource>,
}

impl Registry {
    pub fn new(
        tasks: Box<dyn UnitSource>,
        features: Box<dyn UnitSource>,
        polish: Box<dyn UnitSource>,
    ) -> Self {
        Self {
            tasks,
            features,
            polish,
        }
    }

    /// Registry over the project's configured documents.
    pub fn from_config(paths: &ConductorPaths, config: &ConductorConfig) -> Self {
        let docs = &config.documents;
        let phases = if config.polish.is_empty() {
            default_polish_phases()
        } else {
            config.polish.clone()
        };
        Self::new(
            Box::new(TaskSource {
                root: paths.root.clone(),
                spec: docs.spec.clone(),
                plan: docs.plan.clone(),
                tasks: docs.tasks.clone(),
            }),
            Box::new(FeatureSource {
                root: paths.root.clone(),
                features_dir: docs.features_dir.clone(),
            }),
            Box::new(PolishSource {
                root: paths.root.clone(),
                spec: docs.spec.clone(),
                plan: docs.plan.clone(),
                phases,
            }),
        )
    }

    fn source(&self, kind: UnitKind) -> &dyn UnitSource {
        match kind {
            UnitKind::Task => self.tasks.as_ref(),
            UnitKind::Feature => self.features.as_ref(),
            UnitKind::Polish => self.polish.as_ref(),
        }
    }

    pub fn units(&self, kind: UnitKind) -> Result<Vec<WorkUnit>, EngineError> {
        self.source(kind).units()
    }

    pub fn find(&self, kind: UnitKind, id: &str) -> Result<Option<WorkUnit>, EngineError> {
        self.source(kind).find(id)
    }
}
