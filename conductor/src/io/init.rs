//! Initialization helpers for `.conductor/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{ConductorConfig, write_config};

/// Canonical paths within `.conductor/` for a project root.
#[derive(Debug, Clone)]
pub struct ConductorPaths {
    pub root: PathBuf,
    pub conductor_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub state_path: PathBuf,
}

impl ConductorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let conductor_dir = root.join(".conductor");
        Self {
            root,
            gitignore_path: conductor_dir.join(".gitignore"),
            config_path: conductor_dir.join("config.toml"),
            state_path: conductor_dir.join("state.json"),
            conductor_dir,
        }
    }

    /// Resolve a configured document path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Create `.conductor/` with a default config.
///
/// Fails if `.conductor/` already exists unless `force` is set. The state file
/// is never touched: a fresh one is created on first run.
pub fn init_conductor(root: &Path, force: bool) -> Result<ConductorPaths> {
    let paths = ConductorPaths::new(root);
    if paths.conductor_dir.exists() && !force {
        return Err(anyhow!(
            "conductor init: .conductor already exists (use --force to overwrite)"
        ));
    }
    if paths.conductor_dir.exists() && !paths.conductor_dir.is_dir() {
        return Err(anyhow!(
            "conductor init: .conductor exists but is not a directory"
        ));
    }

    fs::create_dir_all(&paths.conductor_dir)
        .with_context(|| format!("create directory {}", paths.conductor_dir.display()))?;
    fs::write(&paths.gitignore_path, CONDUCTOR_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &ConductorConfig::default())?;

    Ok(paths)
}

const CONDUCTOR_GITIGNORE: &str = "*.tmp\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_conductor(temp.path(), false).expect("init");

        assert!(paths.conductor_dir.is_dir());
        assert!(paths.gitignore_path.is_file());
        assert!(!paths.state_path.exists());
        let cfg = load_config(&paths.config_path).expect("load");
        assert_eq!(cfg, ConductorConfig::default());
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_conductor(temp.path(), false).expect("init");
        let err = init_conductor(temp.path(), false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    /// `--force` resets the config but keeps the orchestration record.
    #[test]
    fn init_with_force_rewrites_config_and_keeps_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_conductor(temp.path(), false).expect("init");
        fs::write(&paths.config_path, "max_retries = 9\n").expect("write config");
        fs::write(&paths.state_path, "{}\n").expect("write state");

        init_conductor(temp.path(), true).expect("re-init");

        assert_eq!(
            load_config(&paths.config_path).expect("load").max_retries,
            2
        );
        assert_eq!(fs::read_to_string(&paths.state_path).expect("read"), "{}\n");
    }

    #[test]
    fn relative_document_paths_resolve_against_root() {
        let paths = ConductorPaths::new("/work/project");
        assert_eq!(
            paths.resolve(Path::new("specs/spec.md")),
            PathBuf::from("/work/project/specs/spec.md")
        );
        assert_eq!(
            paths.resolve(Path::new("/abs/plan.md")),
            PathBuf::from("/abs/plan.md")
        );
    }
}
