//! Conductor configuration stored under `.conductor/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::state::DEFAULT_LINEAGE_BRANCH;

/// Overrides `repository_url` when set.
pub const REPO_URL_ENV: &str = "GITHUB_REPO_URL";

/// Conductor configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Initial lineage branch for a fresh state file.
    pub default_branch: String,
    /// Repository the remote agent works on.
    pub repository_url: String,
    /// Model requested for new sessions. Service default when unset.
    pub model: Option<String>,
    /// Follow-up attempts allowed after the first failed one.
    pub max_retries: u32,
    /// Treat every finished session as verified.
    pub skip_verification: bool,
    pub monitor: MonitorConfig,
    pub documents: DocumentsConfig,
    pub agent: AgentConfig,
    pub oracle: OracleConfig,
    /// Polish phases in execution order. Built-in phases when empty.
    pub polish: Vec<PolishPhaseConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub max_poll_attempts: u32,
}

/// Upstream documents, relative to the project root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DocumentsConfig {
    pub spec: PathBuf,
    pub plan: PathBuf,
    pub tasks: PathBuf,
    /// Each subdirectory is one feature (`spec.md` + `plan.md`).
    pub features_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub api_base: String,
    /// Name of the env var holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OracleBackend {
    /// OpenAI-compatible chat completion endpoint.
    Chat,
    /// Local command reading the request on stdin, printing a verdict on stdout.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    pub backend: OracleBackend,
    pub api_base: String,
    pub api_key_env: String,
    pub model: String,
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolishPhaseConfig {
    pub name: String,
    pub goal: String,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            default_branch: DEFAULT_LINEAGE_BRANCH.to_string(),
            repository_url: String::new(),
            model: None,
            max_retries: 2,
            skip_verification: false,
            monitor: MonitorConfig::default(),
            documents: DocumentsConfig::default(),
            agent: AgentConfig::default(),
            oracle: OracleConfig::default(),
            polish: Vec::new(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_poll_attempts: 60,
        }
    }
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            spec: PathBuf::from("specs/spec.md"),
            plan: PathBuf::from("specs/plan.md"),
            tasks: PathBuf::from("specs/tasks.md"),
            features_dir: PathBuf::from("specs/features"),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.cursor.com/v0".to_string(),
            api_key_env: "CURSOR_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            backend: OracleBackend::Chat,
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            command: Vec::new(),
            timeout_secs: 300,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_branch.trim().is_empty() {
            return Err(anyhow!("default_branch must be non-empty"));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(anyhow!("monitor.poll_interval_secs must be > 0"));
        }
        if self.monitor.max_poll_attempts == 0 {
            return Err(anyhow!("monitor.max_poll_attempts must be > 0"));
        }
        if self.agent.timeout_secs == 0 || self.oracle.timeout_secs == 0 {
            return Err(anyhow!("agent/oracle timeout_secs must be > 0"));
        }
        if self.oracle.backend == OracleBackend::Command
            && (self.oracle.command.is_empty() || self.oracle.command[0].trim().is_empty())
        {
            return Err(anyhow!(
                "oracle.command must be a non-empty array when backend = \"command\""
            ));
        }
        if self.polish.iter().any(|p| p.name.trim().is_empty()) {
            return Err(anyhow!("polish phase names must be non-empty"));
        }
        Ok(())
    }

    /// Apply environment overrides (`GITHUB_REPO_URL`).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(REPO_URL_ENV)
            && !url.trim().is_empty()
        {
            self.repository_url = url;
        }
        self
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        let cfg = ConductorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConductorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
