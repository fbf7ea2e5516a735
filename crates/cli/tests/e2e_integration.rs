//! End-to-end tests for the cliz agent.
//!
//! The first half drives the agent loop with a scripted model and the real
//! tool executor. The second half runs the `cliz` binary against a local
//! mock of the chat-completions endpoint.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cliz_agent::AgentLoop;
use cliz_core::approval::{ApprovalGate, ApprovalMode, Confirm};
use cliz_core::error::{Error, ModelError};
use cliz_core::event::EventBus;
use cliz_core::history::{Session, SessionId, SessionSettings, Turn};
use cliz_core::model::{ModelClient, ModelRequest, ModelResponse};
use cliz_core::store::SessionStore;
use cliz_core::tool::{ToolCall, ToolDescriptor, ToolRegistry, ToolResult, ToolStatus};
use cliz_history::JsonlStore;
use cliz_tools::ToolExecutor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// ── Scripted model ───────────────────────────────────────────────────────

struct ScriptedModel {
    script: Mutex<VecDeque<ModelResponse>>,
    calls: Mutex<usize>,
}

impl ScriptedModel {
    fn new(script: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn infer(&self, _request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        *self.calls.lock().unwrap() += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ModelError::Protocol("script exhausted".into()))
    }
}

/// Keeps asking for the same command forever.
struct Insistent;

#[async_trait]
impl ModelClient for Insistent {
    fn name(&self) -> &str {
        "insistent"
    }

    async fn infer(&self, _request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        Ok(ModelResponse::ToolCalls(vec![ToolCall::new(
            "call_1",
            "echo",
            vec!["once more".into()],
        )]))
    }
}

struct NeverAsked;

#[async_trait]
impl Confirm for NeverAsked {
    async fn ask(&self, call: &ToolCall, _descriptor: &ToolDescriptor) -> Option<String> {
        panic!("unexpected approval prompt for {}", call.tool_name);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn registry() -> Arc<ToolRegistry> {
    Arc::new(
        ToolRegistry::from_descriptors(vec![
            ToolDescriptor::new("ls", "List directory contents"),
            ToolDescriptor::new("echo", "Print arguments"),
            ToolDescriptor::new("seq", "Print a sequence of numbers"),
            ToolDescriptor::new("sleep", "Wait for a while"),
        ])
        .unwrap(),
    )
}

fn auto_agent(model: Arc<dyn ModelClient>, executor: ToolExecutor) -> AgentLoop {
    AgentLoop::new(
        model,
        Arc::new(executor),
        ApprovalGate::new(ApprovalMode::Auto, Arc::new(NeverAsked)),
        Arc::new(EventBus::default()),
    )
    .with_retry_delay(Duration::from_millis(1))
}

fn session() -> Session {
    Session::new(
        SessionId::from("e2e"),
        SessionSettings {
            auto: true,
            respond_language: "English".into(),
        },
    )
}

fn results(session: &Session) -> Vec<&ToolResult> {
    session
        .history
        .turns()
        .iter()
        .filter_map(|t| match t {
            Turn::ToolCallResult(r) => Some(r),
            _ => None,
        })
        .collect()
}

fn requests(session: &Session) -> usize {
    session
        .history
        .turns()
        .iter()
        .filter(|t| matches!(t, Turn::ToolCallRequest(_)))
        .count()
}

// ── Agent loop with real tools ───────────────────────────────────────────

#[tokio::test]
async fn e2e_lists_a_directory_and_answers() {
    let model = ScriptedModel::new(vec![
        ModelResponse::ToolCalls(vec![ToolCall::new("call_1", "ls", vec!["/".into()])]),
        ModelResponse::FinalAnswer("The root directory holds the usual suspects.".into()),
    ]);
    let agent = auto_agent(model.clone(), ToolExecutor::new(registry()));
    let mut session = session();

    let answer = agent
        .run_turn(&mut session, "What is in the root directory?")
        .await
        .unwrap();

    assert_eq!(answer, "The root directory holds the usual suspects.");
    assert_eq!(model.calls(), 2);

    let results = results(&session);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ToolStatus::Exited { code: 0 });
    assert!(!results[0].stdout.is_empty());
    assert_eq!(
        session.history.last(),
        Some(&Turn::AssistantMessage(answer.clone()))
    );
}

#[tokio::test]
async fn e2e_unknown_tool_is_reported_and_loop_continues() {
    let model = ScriptedModel::new(vec![
        ModelResponse::ToolCalls(vec![ToolCall::new("call_1", "foobar", vec![])]),
        ModelResponse::FinalAnswer("foobar is not available here.".into()),
    ]);
    let agent = auto_agent(model.clone(), ToolExecutor::new(registry()));
    let mut session = session();

    let answer = agent.run_turn(&mut session, "run foobar").await.unwrap();

    assert_eq!(answer, "foobar is not available here.");
    let results = results(&session);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ToolStatus::UnknownTool);
    assert!(results[0].stderr.contains("ls"));
}

#[tokio::test]
async fn e2e_loop_limit_leaves_paired_history() {
    let agent = auto_agent(Arc::new(Insistent), ToolExecutor::new(registry())).with_max_iterations(3);
    let mut session = session();

    let err = agent.run_turn(&mut session, "keep going").await.unwrap_err();

    assert!(matches!(err, Error::LoopLimitExceeded { limit: 3 }));
    assert_eq!(err.exit_code(), 4);
    assert_eq!(requests(&session), 3);
    assert_eq!(results(&session).len(), 3);
}

#[tokio::test]
async fn e2e_large_output_is_truncated() {
    let model = ScriptedModel::new(vec![
        ModelResponse::ToolCalls(vec![ToolCall::new(
            "call_1",
            "seq",
            vec!["1".into(), "100000".into()],
        )]),
        ModelResponse::FinalAnswer("Lots of numbers.".into()),
    ]);
    let executor = ToolExecutor::new(registry()).with_max_output_bytes(64);
    let agent = auto_agent(model, executor);
    let mut session = session();

    agent.run_turn(&mut session, "count to a lot").await.unwrap();

    let results = results(&session);
    assert!(results[0].truncated);
    assert_eq!(results[0].stdout.len(), 64);
    assert!(results[0].stdout.starts_with("1\n2\n3\n"));
}

#[tokio::test]
async fn e2e_slow_tool_times_out() {
    let model = ScriptedModel::new(vec![
        ModelResponse::ToolCalls(vec![ToolCall::new("call_1", "sleep", vec!["30".into()])]),
        ModelResponse::FinalAnswer("That took too long.".into()),
    ]);
    let executor = ToolExecutor::new(registry()).with_timeout(Duration::from_millis(300));
    let agent = auto_agent(model, executor);
    let mut session = session();

    let started = std::time::Instant::now();
    let answer = agent.run_turn(&mut session, "wait").await.unwrap();

    assert_eq!(answer, "That took too long.");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(results(&session)[0].status, ToolStatus::TimedOut);
}

#[tokio::test]
async fn e2e_history_survives_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SessionStore> = Arc::new(JsonlStore::new(dir.path().to_path_buf()));

    let first = ScriptedModel::new(vec![
        ModelResponse::ToolCalls(vec![ToolCall::new("call_1", "echo", vec!["hi".into()])]),
        ModelResponse::FinalAnswer("Said hi.".into()),
    ]);
    let agent = auto_agent(first, ToolExecutor::new(registry())).with_store(store.clone());
    let mut session = session();
    agent.run_turn(&mut session, "say hi").await.unwrap();
    drop(agent);

    let turns = store.load(&SessionId::from("e2e")).await.unwrap();
    assert_eq!(turns.len(), 4);

    let mut resumed = Session::resume(
        SessionId::from("e2e"),
        turns,
        SessionSettings {
            auto: true,
            respond_language: "English".into(),
        },
    );
    let second = ScriptedModel::new(vec![ModelResponse::FinalAnswer("You asked me to say hi.".into())]);
    let agent = auto_agent(second, ToolExecutor::new(registry())).with_store(store.clone());
    agent.run_turn(&mut resumed, "what did I ask?").await.unwrap();

    assert_eq!(resumed.history.len(), 6);
    assert_eq!(store.load(&SessionId::from("e2e")).await.unwrap().len(), 6);
}

// ── The binary against a mock endpoint ───────────────────────────────────

fn completion_with_call(id: &str, command: &str, args: &[&str]) -> String {
    let arguments = serde_json::json!({ "command": command, "args": args }).to_string();
    serde_json::json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": { "name": "execute_command", "arguments": arguments }
                }]
            },
            "finish_reason": "tool_calls"
        }]
    })
    .to_string()
}

fn completion_with_text(text: &str) -> String {
    serde_json::json!({
        "choices": [{
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }]
    })
    .to_string()
}

/// Serve the given bodies to successive requests, then stop accepting.
async fn mock_endpoint(bodies: Vec<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        for body in bodies {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{addr}/v1")
}

async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        request.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&request);
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|l| {
                    l.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .and_then(|v| v.trim().parse::<usize>().ok())
                })
                .unwrap_or(0);
            if request.len() >= end + 4 + length {
                return;
            }
        }
    }
}

fn write_config(dir: &std::path::Path, base_url: &str, extra: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    let history = dir.join("sessions");
    let config = format!(
        r#"max_iterations = 2
{extra}

[llm]
model = "mock-model"
base_url = "{base_url}"
api_key = "sk-test"

[history]
backend = "jsonl"
path = "{}"

[[tools]]
name = "ls"
description = "List directory contents"

[[tools]]
name = "echo"
description = "Print arguments"
"#,
        history.display()
    );
    std::fs::write(&path, config).unwrap();
    path
}

fn cliz(home: &std::path::Path) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(env!("CARGO_BIN_EXE_cliz"));
    cmd.env("HOME", home)
        .env_remove("CLIZ_CONFIG")
        .env_remove("CLIZ_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("CLIZ_MODEL")
        .env_remove("CLIZ_BASE_URL")
        .env_remove("RUST_LOG")
        .stdin(std::process::Stdio::null());
    cmd
}

#[tokio::test]
async fn binary_answers_on_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let base_url = mock_endpoint(vec![
        completion_with_call("call_1", "ls", &["/"]),
        completion_with_text("Listed the root directory."),
    ])
    .await;
    let config = write_config(dir.path(), &base_url, "");

    let output = cliz(dir.path())
        .arg("--auto")
        .arg("--config")
        .arg(&config)
        .arg("list the root directory")
        .output()
        .await
        .unwrap();

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "Listed the root directory.");
    assert!(String::from_utf8_lossy(&output.stderr).contains("> ls /"));
}

#[tokio::test]
async fn binary_loop_limit_exit_code_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let base_url = mock_endpoint(vec![
        completion_with_call("call_1", "echo", &["one"]),
        completion_with_call("call_2", "echo", &["two"]),
        completion_with_call("call_3", "echo", &["three"]),
    ])
    .await;
    let config = write_config(dir.path(), &base_url, "chat_history = true");

    let output = cliz(dir.path())
        .args(["--auto", "--session", "limit", "--config"])
        .arg(&config)
        .arg("echo forever")
        .output()
        .await
        .unwrap();

    assert_eq!(output.status.code(), Some(4));
    assert!(output.stdout.is_empty());

    let store = JsonlStore::new(dir.path().join("sessions"));
    let turns = store.load(&SessionId::from("limit")).await.unwrap();
    let requests = turns
        .iter()
        .filter(|t| matches!(t, Turn::ToolCallRequest(_)))
        .count();
    let results = turns
        .iter()
        .filter(|t| matches!(t, Turn::ToolCallResult(_)))
        .count();
    assert_eq!((requests, results), (2, 2));
}

#[tokio::test]
async fn binary_denies_without_terminal_answer() {
    let dir = tempfile::tempdir().unwrap();
    let base_url = mock_endpoint(vec![
        completion_with_call("call_1", "ls", &["/"]),
        completion_with_text("You declined, so nothing ran."),
    ])
    .await;
    let config = write_config(dir.path(), &base_url, "");

    // Manual mode with stdin closed: end of input counts as a denial
    let output = cliz(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("list the root directory")
        .output()
        .await
        .unwrap();

    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("About to run: ls /"));
    assert!(stderr.contains("Do you want to continue? [y/N]"));
    assert!(stderr.contains("ls: denied"));
    // The prompt names the command; no separate request line competes with it
    assert!(!stderr.contains("> ls /"));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "You declined, so nothing ran."
    );
}

#[tokio::test]
async fn binary_missing_config_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = cliz(dir.path())
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("hello")
        .output()
        .await
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}

#[tokio::test]
async fn binary_unreachable_model_exits_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    // Bind and drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let config = write_config(dir.path(), &format!("http://{addr}/v1"), "");

    let output = cliz(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("hello")
        .output()
        .await
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
}
