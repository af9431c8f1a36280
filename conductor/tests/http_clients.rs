use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use conductor::core::types::{SessionStatus, VerdictStatus};
use conductor::io::agent::{AgentClient, CursorAgentClient, LaunchRequest};
use conductor::io::oracle::{ChatOracle, Oracle, VerifyRequest};
use serde_json::{Value, json};

/// Request as seen by the test server.
struct Captured {
    request_line: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Captured {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn json(&self) -> Value {
        serde_json::from_str(&self.body).expect("request body json")
    }
}

/// Serve exactly one request with `status_line` and `response_body`.
fn spawn_server(status_line: &str, response_body: String) -> (String, JoinHandle<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    let status_line = status_line.to_string();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .expect("read request line");

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read header line");
            if line == "\r\n" || line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.trim_end().split_once(':') {
                headers.push((key.trim().to_string(), value.trim().to_string()));
            }
        }

        let length = headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).expect("read body");

        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            response_body.len(),
            response_body
        );
        stream
            .write_all(response.as_bytes())
            .expect("write response");

        Captured {
            request_line: request_line.trim_end().to_string(),
            headers,
            body: String::from_utf8(body).expect("utf8 body"),
        }
    });

    (format!("http://{addr}/v0"), handle)
}

fn client(base: &str) -> CursorAgentClient {
    CursorAgentClient::new(base, "key-123", Duration::from_secs(5))
}

#[test]
fn launch_posts_repository_ref_and_prompt() {
    let (base, server) = spawn_server("200 OK", json!({"id": "bc-abc"}).to_string());

    let id = client(&base)
        .launch(&LaunchRequest {
            name: "Task T001".to_string(),
            prompt: "Build the login form".to_string(),
            repository: "https://github.com/acme/app".to_string(),
            source_ref: "cursor/t000".to_string(),
            model: None,
        })
        .expect("launch");

    assert_eq!(id, "bc-abc");
    let request = server.join().expect("server");
    assert_eq!(request.request_line, "POST /v0/agents HTTP/1.1");
    assert_eq!(request.header("authorization"), Some("Bearer key-123"));
    assert_eq!(
        request.json(),
        json!({
            "name": "Task T001",
            "source": {"repository": "https://github.com/acme/app", "ref": "cursor/t000"},
            "prompt": {"text": "Build the login form"},
        })
    );
}

#[test]
fn launch_includes_model_when_configured() {
    let (base, server) = spawn_server("200 OK", json!({"id": "bc-1"}).to_string());

    client(&base)
        .launch(&LaunchRequest {
            name: "Feature 001-auth".to_string(),
            prompt: "p".to_string(),
            repository: "r".to_string(),
            source_ref: "main".to_string(),
            model: Some("claude-4-sonnet".to_string()),
        })
        .expect("launch");

    let request = server.join().expect("server");
    assert_eq!(request.json()["model"], "claude-4-sonnet");
}

#[test]
fn status_maps_summary_and_target_branch() {
    let body = json!({
        "id": "bc-abc",
        "status": "FINISHED",
        "summary": "Added the form",
        "target": {"branchName": "cursor/login-form", "url": "https://cursor.com/agents?id=bc-abc"},
    });
    let (base, server) = spawn_server("200 OK", body.to_string());

    let report = client(&base).status("bc-abc").expect("status");

    assert_eq!(report.status, SessionStatus::Finished);
    assert_eq!(report.summary.as_deref(), Some("Added the form"));
    assert_eq!(report.resulting_branch.as_deref(), Some("cursor/login-form"));
    let request = server.join().expect("server");
    assert_eq!(request.request_line, "GET /v0/agents/bc-abc HTTP/1.1");
}

#[test]
fn status_tolerates_unknown_values_and_missing_target() {
    let (base, server) = spawn_server("200 OK", json!({"status": "EXPIRED"}).to_string());

    let report = client(&base).status("bc-1").expect("status");

    assert_eq!(report.status, SessionStatus::Unknown);
    assert!(!report.status.is_terminal());
    assert_eq!(report.summary, None);
    assert_eq!(report.resulting_branch, None);
    server.join().expect("server");
}

#[test]
fn follow_up_posts_prompt_text() {
    let (base, server) = spawn_server("200 OK", json!({"id": "bc-abc"}).to_string());

    client(&base)
        .add_follow_up("bc-abc", "VERIFICATION FAILED:\nno tests")
        .expect("follow-up");

    let request = server.join().expect("server");
    assert_eq!(request.request_line, "POST /v0/agents/bc-abc/followup HTTP/1.1");
    assert_eq!(
        request.json(),
        json!({"prompt": {"text": "VERIFICATION FAILED:\nno tests"}})
    );
}

#[test]
fn http_error_carries_status_and_body() {
    let (base, server) = spawn_server("401 Unauthorized", "{\"error\":\"bad key\"}".to_string());

    let err = client(&base).status("bc-1").expect_err("unauthorized");

    let message = format!("{err:#}");
    assert!(message.contains("HTTP 401"), "{message}");
    assert!(message.contains("bad key"), "{message}");
    server.join().expect("server");
}

fn verify_request() -> VerifyRequest {
    VerifyRequest {
        context: "Task T001: Add login".to_string(),
        acceptance_criteria: "Users can log in.".to_string(),
        output_summary: "Added a login form.".to_string(),
    }
}

fn completion(content: &str) -> String {
    json!({
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}],
    })
    .to_string()
}

#[test]
fn chat_oracle_requests_json_verdict() {
    let (base, server) = spawn_server(
        "200 OK",
        completion(r#"{"status": "pass", "feedback": "Looks complete."}"#),
    );
    let oracle = ChatOracle::new(&base, "sk-test", "gpt-4o-mini", Duration::from_secs(5));

    let verdict = oracle.verify(&verify_request());

    assert_eq!(verdict.status, VerdictStatus::Pass);
    assert_eq!(verdict.feedback, "Looks complete.");
    let request = server.join().expect("server");
    assert_eq!(request.request_line, "POST /v0/chat/completions HTTP/1.1");
    assert_eq!(request.header("authorization"), Some("Bearer sk-test"));
    let body = request.json();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["response_format"]["type"], "json_object");
    let user = body["messages"][1]["content"].as_str().expect("user prompt");
    assert!(user.contains("Users can log in."));
    assert!(user.contains("Added a login form."));
}

#[test]
fn chat_oracle_folds_malformed_reply_into_fail() {
    let (base, server) = spawn_server("200 OK", completion(r#"{"status": "maybe"}"#));
    let oracle = ChatOracle::new(&base, "sk-test", "gpt-4o-mini", Duration::from_secs(5));

    let verdict = oracle.verify(&verify_request());

    assert_eq!(verdict.status, VerdictStatus::Fail);
    assert!(
        verdict.feedback.starts_with("Verification system error:"),
        "{}",
        verdict.feedback
    );
    server.join().expect("server");
}

#[test]
fn chat_oracle_folds_http_error_into_fail() {
    let (base, server) = spawn_server("503 Service Unavailable", "{}".to_string());
    let oracle = ChatOracle::new(&base, "sk-test", "gpt-4o-mini", Duration::from_secs(5));

    let verdict = oracle.verify(&verify_request());

    assert_eq!(verdict.status, VerdictStatus::Fail);
    assert!(verdict.feedback.contains("HTTP 503"), "{}", verdict.feedback);
    server.join().expect("server");
}
