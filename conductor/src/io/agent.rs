//! Remote coding-agent service client.
//!
//! The [`AgentClient`] trait decouples the engine from the HTTP API. Tests use
//! scripted clients that replay status sequences without touching the network.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::types::{SessionReport, SessionStatus};

/// Parameters for launching a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Human-readable session name, e.g. `Task T001`.
    pub name: String,
    pub prompt: String,
    pub repository: String,
    /// Branch the session starts from (the lineage branch).
    pub source_ref: String,
    pub model: Option<String>,
}

/// Remote agent service port.
pub trait AgentClient {
    /// Create a session. Returns its id.
    fn launch(&self, request: &LaunchRequest) -> Result<String>;
    /// Fetch the current status of a session.
    fn status(&self, session_id: &str) -> Result<SessionReport>;
    /// Append instructions to an existing session.
    fn add_follow_up(&self, session_id: &str, text: &str) -> Result<()>;
}

/// Client for the Cursor background agents API (`/v0/agents`).
pub struct CursorAgentClient {
    agent: ureq::Agent,
    api_base: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct PromptBody<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SourceBody<'a> {
    repository: &'a str,
    #[serde(rename = "ref")]
    git_ref: &'a str,
}

#[derive(Debug, Serialize)]
struct LaunchBody<'a> {
    name: &'a str,
    source: SourceBody<'a>,
    prompt: PromptBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct FollowUpBody<'a> {
    prompt: PromptBody<'a>,
}

#[derive(Debug, Deserialize)]
struct LaunchResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: SessionStatus,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    target: Option<TargetResponse>,
}

#[derive(Debug, Deserialize)]
struct TargetResponse {
    #[serde(default, rename = "branchName")]
    branch_name: Option<String>,
}

impl CursorAgentClient {
    pub fn new(api_base: &str, api_key: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Build a client from the API key stored in `key_env`.
    pub fn from_env(api_base: &str, key_env: &str, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var(key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("environment variable {key_env} is not set"))?;
        Ok(Self::new(api_base, api_key, timeout))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn authorization(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

impl AgentClient for CursorAgentClient {
    #[instrument(skip_all, fields(name = %request.name, source_ref = %request.source_ref))]
    fn launch(&self, request: &LaunchRequest) -> Result<String> {
        let url = self.endpoint("agents");
        let body = LaunchBody {
            name: &request.name,
            source: SourceBody {
                repository: &request.repository,
                git_ref: &request.source_ref,
            },
            prompt: PromptBody {
                text: &request.prompt,
            },
            model: request.model.as_deref(),
        };
        let response = self
            .agent
            .post(&url)
            .set("Authorization", &self.authorization())
            .send_json(serde_json::to_value(&body).context("serialize launch body")?)
            .map_err(|e| request_error("launch session", e))?;
        let launched: LaunchResponse = response
            .into_json()
            .context("parse launch response")?;
        info!(session_id = %launched.id, "session launched");
        Ok(launched.id)
    }

    fn status(&self, session_id: &str) -> Result<SessionReport> {
        let url = self.endpoint(&format!("agents/{session_id}"));
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &self.authorization())
            .call()
            .map_err(|e| request_error("fetch session status", e))?;
        let raw: StatusResponse = response
            .into_json()
            .context("parse status response")?;
        debug!(session_id, status = %raw.status, "session status");
        Ok(SessionReport {
            status: raw.status,
            summary: raw.summary,
            resulting_branch: raw.target.and_then(|t| t.branch_name),
        })
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    fn add_follow_up(&self, session_id: &str, text: &str) -> Result<()> {
        let url = self.endpoint(&format!("agents/{session_id}/followup"));
        let body = FollowUpBody {
            prompt: PromptBody { text },
        };
        self.agent
            .post(&url)
            .set("Authorization", &self.authorization())
            .send_json(serde_json::to_value(&body).context("serialize follow-up body")?)
            .map_err(|e| request_error("add follow-up", e))?;
        info!(session_id, "follow-up sent");
        Ok(())
    }
}

fn request_error(action: &str, err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            anyhow!("{action} failed: HTTP {code}: {}", body.trim())
        }
        ureq::Error::Transport(transport) => anyhow!("{action} failed: {transport}"),
    }
}
