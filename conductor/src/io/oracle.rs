//! Verification oracle adapters.
//!
//! An oracle never fails from the engine's point of view: any error while
//! judging is folded into a fail verdict so a transient outage costs one retry
//! instead of aborting the run.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::core::types::{Verdict, VerdictStatus};
use crate::io::config::{OracleBackend, OracleConfig};
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::verify_prompt;

const VERDICT_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/verdict.schema.json"
));

const SYSTEM_PROMPT: &str =
    "You are a precise quality assurance assistant for a coding orchestrator.";
const NO_FEEDBACK: &str = "No feedback provided.";
const OUTPUT_LIMIT_BYTES: usize = 256 * 1024;

/// Input handed to an oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyRequest {
    /// Which unit was worked on, e.g. `Task T001: Add login form`.
    pub context: String,
    pub acceptance_criteria: String,
    pub output_summary: String,
}

/// Verification oracle port. Infallible by contract.
pub trait Oracle {
    fn verify(&self, request: &VerifyRequest) -> Verdict;
}

/// Wrap a fallible judgment into the infallible oracle contract.
fn verdict_or_system_error(result: Result<Verdict>) -> Verdict {
    match result {
        Ok(verdict) => {
            info!(status = ?verdict.status, "verification finished");
            verdict
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "verification errored, treating as fail");
            Verdict::fail(format!("Verification system error: {err:#}"))
        }
    }
}

/// Parse and schema-check a verdict emitted by an oracle backend.
pub fn parse_verdict(raw: &str) -> Result<Verdict> {
    let value: Value = serde_json::from_str(raw.trim()).context("parse verdict json")?;
    let schema: Value = serde_json::from_str(VERDICT_SCHEMA).context("parse verdict schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile verdict schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("verdict schema validation failed: {}", messages.join("; "));
    }

    #[derive(Deserialize)]
    struct RawVerdict {
        status: VerdictStatus,
        #[serde(default)]
        feedback: Option<String>,
    }
    let raw: RawVerdict = serde_json::from_value(value).context("deserialize verdict")?;
    let feedback = raw
        .feedback
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| NO_FEEDBACK.to_string());
    Ok(Verdict {
        status: raw.status,
        feedback,
    })
}

/// OpenAI-compatible chat completion oracle with a JSON-object response.
pub struct ChatOracle {
    agent: ureq::Agent,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatOracle {
    pub fn new(
        api_base: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn judge(&self, request: &VerifyRequest) -> Result<Verdict> {
        let prompt = verify_prompt(request)?;
        let url = format!("{}/chat/completions", self.api_base);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "response_format": {"type": "json_object"},
        });
        let response = self
            .agent
            .post(&url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(body)
            .map_err(|err| match err {
                ureq::Error::Status(code, response) => {
                    let body = response.into_string().unwrap_or_default();
                    anyhow!("chat completion failed: HTTP {code}: {}", body.trim())
                }
                ureq::Error::Transport(transport) => {
                    anyhow!("chat completion failed: {transport}")
                }
            })?;
        let parsed: ChatResponse = response
            .into_json()
            .context("parse chat completion response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat completion returned no content"))?;
        parse_verdict(&content)
    }
}

impl Oracle for ChatOracle {
    #[instrument(skip_all, fields(model = %self.model))]
    fn verify(&self, request: &VerifyRequest) -> Verdict {
        verdict_or_system_error(self.judge(request))
    }
}

/// Runs a local command with the request as JSON on stdin.
///
/// The command prints a verdict JSON object on stdout. A non-zero exit or a
/// timeout is a fail verdict.
pub struct CommandOracle {
    argv: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
}

impl CommandOracle {
    pub fn new(argv: Vec<String>, workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            argv,
            workdir: workdir.into(),
            timeout,
        }
    }

    fn judge(&self, request: &VerifyRequest) -> Result<Verdict> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("oracle command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let input = serde_json::to_vec(request).context("serialize verify request")?;

        let output = run_command_with_timeout(cmd, Some(&input), self.timeout, OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run oracle command {program}"))?;
        if output.timed_out {
            return Ok(Verdict::fail(format!(
                "Verification command timed out after {}s",
                self.timeout.as_secs()
            )));
        }
        if !output.status.success() {
            let stderr = output.stderr_text();
            let detail = if stderr.is_empty() {
                String::new()
            } else {
                format!(": {stderr}")
            };
            return Ok(Verdict::fail(format!(
                "Verification command exited with {}{detail}",
                output
                    .status
                    .code()
                    .map_or_else(|| "a signal".to_string(), |c| format!("code {c}"))
            )));
        }
        parse_verdict(&String::from_utf8_lossy(&output.stdout))
    }
}

impl Oracle for CommandOracle {
    #[instrument(skip_all, fields(command = ?self.argv))]
    fn verify(&self, request: &VerifyRequest) -> Verdict {
        verdict_or_system_error(self.judge(request))
    }
}

/// Oracle selected by `[oracle]` configuration.
pub enum ConfiguredOracle {
    Chat(ChatOracle),
    Command(CommandOracle),
    /// Verification is skipped; every call fails so a misuse is visible.
    Disabled,
}

impl ConfiguredOracle {
    /// Build the configured backend. `enabled = false` skips credential checks.
    pub fn from_config(config: &OracleConfig, workdir: &Path, enabled: bool) -> Result<Self> {
        if !enabled {
            return Ok(Self::Disabled);
        }
        let timeout = Duration::from_secs(config.timeout_secs);
        match config.backend {
            OracleBackend::Chat => {
                let api_key = std::env::var(&config.api_key_env)
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .ok_or_else(|| {
                        anyhow!("environment variable {} is not set", config.api_key_env)
                    })?;
                Ok(Self::Chat(ChatOracle::new(
                    &config.api_base,
                    api_key,
                    config.model.clone(),
                    timeout,
                )))
            }
            OracleBackend::Command => Ok(Self::Command(CommandOracle::new(
                config.command.clone(),
                workdir,
                timeout,
            ))),
        }
    }
}

impl Oracle for ConfiguredOracle {
    fn verify(&self, request: &VerifyRequest) -> Verdict {
        match self {
            Self::Chat(oracle) => oracle.verify(request),
            Self::Command(oracle) => oracle.verify(request),
            Self::Disabled => Verdict::fail("Verification is disabled for this run."),
        }
    }
}
