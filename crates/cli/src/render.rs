//! Progress rendering from domain events.
//!
//! Tool activity goes to stderr. Streamed model text goes to stdout as it
//! arrives, so a streamed answer is not printed a second time.
//!
//! In manual mode the approval prompt announces each prompted command itself,
//! so the renderer leaves those request lines out instead of racing the prompt.

use cliz_core::approval::ApprovalMode;
use cliz_core::event::DomainEvent;
use cliz_core::tool::{CallPurpose, SpawnFailure, ToolCall, ToolStatus};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Whether any token reached stdout.
pub type Streamed = bool;

/// Render events until every sender of the bus is gone.
pub fn spawn(mut rx: broadcast::Receiver<Arc<DomainEvent>>, mode: ApprovalMode) -> JoinHandle<Streamed> {
    tokio::spawn(async move {
        let mut streamed = false;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(line) = describe(&event, mode) {
                        eprintln!("{line}");
                    }
                    if let DomainEvent::Token { text } = event.as_ref() {
                        let mut stdout = std::io::stdout().lock();
                        let _ = stdout.write_all(text.as_bytes());
                        let _ = stdout.flush();
                        streamed = true;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "Renderer lagged behind events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        streamed
    })
}

/// One stderr line for an event, if it deserves one.
fn describe(event: &DomainEvent, mode: ApprovalMode) -> Option<String> {
    match event {
        DomainEvent::ToolCallRequested { call, .. } if mode == ApprovalMode::Manual && prompted(call) => None,
        DomainEvent::ToolCallRequested { call, .. } => Some(match call.purpose {
            CallPurpose::Execute => format!("> {}", call.command_line()),
            CallPurpose::Help => format!("> {} (help)", call.command_line()),
        }),
        DomainEvent::ToolExecuted {
            tool_name,
            status,
            truncated,
            duration_ms,
            ..
        } => {
            let outcome = match status {
                ToolStatus::Exited { code } => format!("exit {code}"),
                ToolStatus::Signaled => "killed by signal".to_string(),
                ToolStatus::Denied => "denied".to_string(),
                ToolStatus::TimedOut => "timed out".to_string(),
                ToolStatus::UnknownTool => "not a configured tool".to_string(),
                ToolStatus::SpawnFailed { reason } => match reason {
                    SpawnFailure::NotFound => "not installed".to_string(),
                    SpawnFailure::PermissionDenied => "permission denied".to_string(),
                    SpawnFailure::Other => "failed to start".to_string(),
                },
            };
            let truncated = if *truncated { ", output truncated" } else { "" };
            Some(format!("  {tool_name}: {outcome} ({duration_ms} ms{truncated})"))
        }
        DomainEvent::TurnFinished { outcome, .. } if outcome == "cancelled" => {
            Some("Cancelled.".to_string())
        }
        _ => None,
    }
}

/// Whether a manual-mode call goes through the approval prompt: everything
/// except a help lookup carrying only the help flag.
fn prompted(call: &ToolCall) -> bool {
    !(call.purpose == CallPurpose::Help && call.arguments.len() == 1)
}
