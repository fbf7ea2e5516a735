//! The agent reasoning loop implementation.

use chrono::Utc;
use cliz_core::approval::{ApprovalGate, Decision};
use cliz_core::error::{Error, ModelError, Result};
use cliz_core::event::{DomainEvent, EventBus};
use cliz_core::history::{Session, Turn};
use cliz_core::model::{ModelClient, ModelRequest, ModelResponse};
use cliz_core::store::SessionStore;
use cliz_core::tool::{ToolCall, ToolResult};
use cliz_tools::ToolExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default bound on Reasoning/Acting cycles per user turn.
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// Where the loop is within one user turn.
#[derive(Debug)]
pub(crate) enum LoopState {
    AwaitingUserInput,
    Reasoning { iteration: u32 },
    Acting { iteration: u32, calls: Vec<ToolCall> },
    Responding { iteration: u32, text: String },
}

/// The core agent loop that orchestrates model calls and tool execution.
pub struct AgentLoop {
    /// The language model
    model: Arc<dyn ModelClient>,

    /// Runs approved tool calls; also owns the tool registry
    executor: Arc<ToolExecutor>,

    /// Decides whether a call may run
    gate: ApprovalGate,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,

    /// Durable history, when enabled
    store: Option<Arc<dyn SessionStore>>,

    /// Maximum Reasoning/Acting cycles per user turn
    max_iterations: u32,

    /// Previous user turns replayed to the model; `None` replays all
    history_runs: Option<usize>,

    /// Pause before the single retry of an unavailable model
    retry_delay: Duration,

    cancel: CancellationToken,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(
        model: Arc<dyn ModelClient>,
        executor: Arc<ToolExecutor>,
        gate: ApprovalGate,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            model,
            executor,
            gate,
            event_bus,
            store: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            history_runs: None,
            retry_delay: Duration::from_secs(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Persist every turn to `store` before moving on.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the maximum number of Reasoning/Acting cycles.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Bound how many previous user turns are replayed to the model.
    pub fn with_history_runs(mut self, runs: Option<usize>) -> Self {
        self.history_runs = runs;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token that cancels the current turn.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one user turn to completion.
    ///
    /// Returns the model's final answer. Tool-level failures never end the
    /// turn; they are recorded as results and handed back to the model.
    pub async fn run_turn(&self, session: &mut Session, instruction: &str) -> Result<String> {
        info!(
            session = %session.id,
            turns = session.history.len(),
            mode = ?self.gate.mode(),
            "Processing instruction"
        );

        let mut state = LoopState::AwaitingUserInput;
        loop {
            state = match state {
                LoopState::AwaitingUserInput => {
                    self.record(session, Turn::UserMessage(instruction.to_string()))
                        .await?;
                    self.event_bus.publish(DomainEvent::TurnStarted {
                        session_id: session.id.to_string(),
                        instruction_preview: instruction.chars().take(80).collect(),
                        timestamp: Utc::now(),
                    });
                    LoopState::Reasoning { iteration: 1 }
                }

                LoopState::Reasoning { iteration } => {
                    if self.cancel.is_cancelled() {
                        info!(session = %session.id, "Turn cancelled");
                        self.record(session, Turn::Cancelled).await?;
                        return Err(self.finish(session, iteration - 1, Error::Cancelled));
                    }

                    if iteration > self.max_iterations {
                        warn!(
                            session = %session.id,
                            limit = self.max_iterations,
                            "Max tool iterations reached"
                        );
                        let err = Error::LoopLimitExceeded {
                            limit: self.max_iterations,
                        };
                        return Err(self.finish(session, iteration - 1, err));
                    }

                    debug!(session = %session.id, iteration, "Agent loop iteration");

                    match self.infer(session).await {
                        // Cancelled mid-request; the top of Reasoning handles it
                        Ok(None) => LoopState::Reasoning { iteration },
                        Ok(Some(ModelResponse::FinalAnswer(text))) => {
                            self.publish_response(session, iteration, 0);
                            LoopState::Responding { iteration, text }
                        }
                        Ok(Some(ModelResponse::ToolCalls(calls))) => {
                            self.publish_response(session, iteration, calls.len());
                            LoopState::Acting { iteration, calls }
                        }
                        Err(e) => {
                            self.event_bus.publish(DomainEvent::ErrorOccurred {
                                context: "model".into(),
                                error_message: e.to_string(),
                                timestamp: Utc::now(),
                            });
                            return Err(self.finish(session, iteration, e.into()));
                        }
                    }
                }

                LoopState::Acting { iteration, calls } => {
                    debug!(tool_count = calls.len(), "Executing tool calls");
                    for call in calls {
                        if self.cancel.is_cancelled() {
                            debug!("Cancellation requested, skipping remaining tool calls");
                            break;
                        }
                        self.act(session, call).await?;
                    }
                    LoopState::Reasoning {
                        iteration: iteration + 1,
                    }
                }

                LoopState::Responding { iteration, text } => {
                    self.record(session, Turn::AssistantMessage(text.clone()))
                        .await?;
                    self.event_bus.publish(DomainEvent::TurnFinished {
                        session_id: session.id.to_string(),
                        iterations: iteration,
                        outcome: "answered".into(),
                        timestamp: Utc::now(),
                    });
                    return Ok(text);
                }
            };
        }
    }

    /// One inference, retried once when the model is unavailable.
    ///
    /// `Ok(None)` means the turn was cancelled while waiting.
    async fn infer(
        &self,
        session: &Session,
    ) -> std::result::Result<Option<ModelResponse>, ModelError> {
        let request = ModelRequest {
            history: session.history.view(self.history_runs),
            catalog: self.executor.registry().catalog(),
            respond_language: &session.settings.respond_language,
        };

        let mut retried = false;
        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                outcome = self.model.infer(request) => outcome,
            };

            match outcome {
                Ok(response) => return Ok(Some(response)),
                Err(e) if e.is_unavailable() && !retried => {
                    warn!(
                        model = %self.model.name(),
                        error = %e,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        "Model unavailable, retrying once"
                    );
                    retried = true;
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record, gate and run a single tool call.
    async fn act(&self, session: &mut Session, mut call: ToolCall) -> Result<()> {
        if session.history.contains_call_id(&call.call_id) {
            let fresh = format!("call_{}", uuid::Uuid::new_v4().simple());
            debug!(original = %call.call_id, replacement = %fresh, "Rewriting reused call id");
            call.call_id = fresh;
        }

        self.record(session, Turn::ToolCallRequest(call.clone())).await?;
        self.event_bus.publish(DomainEvent::ToolCallRequested {
            call: call.clone(),
            timestamp: Utc::now(),
        });

        let registry = self.executor.registry();
        let result = match registry.resolve(&call.tool_name) {
            Err(e) => {
                warn!(tool = %call.tool_name, error = %e, "Model requested an unregistered tool");
                ToolResult::unknown_tool(&call, &registry.names())
            }
            Ok(descriptor) => match self.gate.authorize(&call, descriptor).await {
                Decision::Approved => self.executor.execute(&call).await,
                Decision::Denied => ToolResult::denied(&call),
            },
        };

        self.event_bus.publish(DomainEvent::ToolExecuted {
            call_id: result.call_id.clone(),
            tool_name: call.tool_name.clone(),
            status: result.status,
            truncated: result.truncated,
            duration_ms: result.duration_ms,
            timestamp: Utc::now(),
        });

        self.record(session, Turn::ToolCallResult(result)).await
    }

    /// Append a turn: durable first (when persistence is on), then in memory.
    async fn record(&self, session: &mut Session, turn: Turn) -> Result<()> {
        if let Some(store) = &self.store {
            store.append(&session.id, &turn).await.map_err(|e| {
                warn!(store = store.name(), error = %e, "Failed to persist turn");
                e
            })?;
        }
        debug!(session = %session.id, kind = turn.kind(), "Turn recorded");
        session.history.push(turn);
        Ok(())
    }

    fn publish_response(&self, session: &Session, iteration: u32, tool_calls: usize) {
        self.event_bus.publish(DomainEvent::ModelResponded {
            session_id: session.id.to_string(),
            iteration,
            tool_calls,
            timestamp: Utc::now(),
        });
    }

    /// Publish the end of an unsuccessful turn and hand the error back.
    fn finish(&self, session: &Session, iterations: u32, err: Error) -> Error {
        let outcome = match &err {
            Error::Cancelled => "cancelled",
            Error::LoopLimitExceeded { .. } => "loop_limit",
            _ => "error",
        };
        self.event_bus.publish(DomainEvent::TurnFinished {
            session_id: session.id.to_string(),
            iterations,
            outcome: outcome.into(),
            timestamp: Utc::now(),
        });
        err
    }
}
