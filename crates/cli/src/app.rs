//! Wires configuration into a running agent for one instruction.

use crate::confirm::TerminalConfirm;
use crate::render;
use cliz_agent::AgentLoop;
use cliz_config::{AppConfig, HistoryBackend, HistoryConfig};
use cliz_core::approval::{ApprovalGate, ApprovalMode};
use cliz_core::error::{Error, Result};
use cliz_core::event::EventBus;
use cliz_core::history::{Session, SessionId, SessionSettings};
use cliz_core::store::SessionStore;
use cliz_core::tool::ToolRegistry;
use cliz_history::{JsonlStore, SqliteStore};
use cliz_providers::OpenAiCompatClient;
use cliz_tools::ToolExecutor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Command-line options for one run.
pub struct Options {
    pub instruction: String,
    pub auto: bool,
    pub config: Option<PathBuf>,
    /// Explicitly chosen session, if any
    pub session: Option<String>,
    pub new: bool,
}

pub const DEFAULT_SESSION: &str = "default";

pub struct Answer {
    pub text: String,
    /// The text already reached stdout token by token
    pub streamed: bool,
}

pub async fn run(options: Options) -> Result<Answer> {
    let instruction = options.instruction.trim();
    if instruction.is_empty() {
        return Err(Error::Config {
            message: "the instruction is empty".into(),
        });
    }

    let config = AppConfig::load(options.config.as_deref()).map_err(|e| Error::Config {
        message: e.to_string(),
    })?;
    if !config.has_api_key() {
        warn!("No API key configured; set CLIZ_API_KEY or llm.api_key unless the endpoint needs none");
    }

    let registry = ToolRegistry::from_descriptors(config.tools.clone())?;
    if registry.is_empty() {
        warn!("No tools configured; add [[tools]] entries to the config file");
    }
    let executor = ToolExecutor::new(Arc::new(registry))
        .with_timeout(Duration::from_secs(config.executor.timeout_secs))
        .with_max_output_bytes(config.executor.max_output_bytes);

    let event_bus = Arc::new(EventBus::default());
    let model = OpenAiCompatClient::from_config(&config.llm)?.with_event_bus(event_bus.clone());

    let mode = ApprovalMode::resolve(config.auto, options.auto);
    let cancel = CancellationToken::new();
    let gate = ApprovalGate::new(mode, Arc::new(TerminalConfirm::terminal(cancel.clone())));

    let settings = SessionSettings {
        auto: mode == ApprovalMode::Auto,
        respond_language: config.respond_language.clone(),
    };
    let session_id = SessionId::from(options.session.as_deref().unwrap_or(DEFAULT_SESSION));

    let mut agent = AgentLoop::new(Arc::new(model), Arc::new(executor), gate, event_bus.clone())
        .with_max_iterations(config.max_iterations)
        .with_history_runs(config.history.history_runs)
        .with_cancellation(cancel.clone());

    let mut session = if config.chat_history {
        let store = open_store(&config.history).await?;
        if options.new {
            info!(session = %session_id, "Clearing stored history");
            store.clear(&session_id).await?;
        }
        let turns = store.load(&session_id).await?;
        debug!(session = %session_id, turns = turns.len(), backend = store.name(), "Session loaded");
        agent = agent.with_store(store);
        Session::resume(session_id, turns, settings)
    } else {
        for ignored in ignored_history_flags(&options) {
            warn!(flag = ignored, "Chat history is disabled; set chat_history = true to use this flag");
        }
        Session::new(session_id, settings)
    };

    spawn_interrupt_handler(cancel);
    let renderer = render::spawn(event_bus.subscribe(), mode);

    let result = agent.run_turn(&mut session, instruction).await;

    // Dropping every sender lets the renderer drain and stop
    drop(agent);
    drop(event_bus);
    let streamed = renderer.await.unwrap_or(false);

    result.map(|text| Answer { text, streamed })
}

/// History flags that have no effect without chat history.
fn ignored_history_flags(options: &Options) -> Vec<&'static str> {
    let mut flags = Vec::new();
    if options.session.is_some() {
        flags.push("--session");
    }
    if options.new {
        flags.push("--new");
    }
    flags
}

async fn open_store(config: &HistoryConfig) -> Result<Arc<dyn SessionStore>> {
    let path = config.resolved_path();
    debug!(path = %path.display(), backend = ?config.backend, "Opening history store");
    Ok(match config.backend {
        HistoryBackend::Sqlite => Arc::new(SqliteStore::open(&path).await?),
        HistoryBackend::Jsonl => Arc::new(JsonlStore::new(path)),
    })
}

/// First Ctrl-C cancels the turn gracefully; the second exits at once.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("\nCancelling... press Ctrl-C again to exit immediately.");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(session: Option<&str>, new: bool) -> Options {
        Options {
            instruction: "list files".into(),
            auto: false,
            config: None,
            session: session.map(String::from),
            new,
        }
    }

    #[test]
    fn history_flags_without_history_are_reported() {
        assert!(ignored_history_flags(&options(None, false)).is_empty());
        assert_eq!(ignored_history_flags(&options(Some("work"), false)), ["--session"]);
        assert_eq!(
            ignored_history_flags(&options(Some("work"), true)),
            ["--session", "--new"]
        );
    }

    #[tokio::test]
    async fn empty_instruction_is_a_config_error() {
        let err = run(Options {
            instruction: "   ".into(),
            ..options(None, false)
        })
        .await
        .err()
        .unwrap();
        assert_eq!(err.exit_code(), 1);
    }
}
