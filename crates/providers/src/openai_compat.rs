//! OpenAI-compatible model client.
//!
//! Works with any endpoint that speaks the `/chat/completions` protocol
//! (OpenAI, OpenRouter, Ollama, vLLM, DeepSeek, ...).
//!
//! The model sees two functions:
//! - `execute_command(command, args, work_dir?)` runs a catalog tool
//! - `get_tool_help(command, sub_command?)` runs the tool's help flag
//!
//! Both become [`ToolCall`]s; everything else the endpoint says is either a
//! final answer or a protocol error.

use crate::prompt::{SystemContext, system_prompt};
use crate::stream::SseAccumulator;
use async_trait::async_trait;
use cliz_config::LlmConfig;
use cliz_core::error::ModelError;
use cliz_core::event::{DomainEvent, EventBus};
use cliz_core::history::Turn;
use cliz_core::model::{ModelClient, ModelRequest, ModelResponse};
use cliz_core::tool::{CallPurpose, DEFAULT_HELP_ARG, ToolCall, ToolDescriptor, ToolResult};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const EXECUTE_COMMAND: &str = "execute_command";
pub const GET_TOOL_HELP: &str = "get_tool_help";

/// Stand-in history entry for a turn the user interrupted.
const CANCELLED_NOTE: &str = "(The previous request was cancelled by the user before it finished.)";

/// A model client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiCompatClient {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    stream: bool,
    client: reqwest::Client,
    event_bus: Option<Arc<EventBus>>,
}

impl OpenAiCompatClient {
    /// Create a client for `model` at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ModelError::Unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
            stream: false,
            client,
            event_bus: None,
        })
    }

    /// Create a client from the `[llm]` configuration section.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ModelError> {
        let client = Self::new(
            &config.base_url,
            config.api_key.clone().unwrap_or_default(),
            &config.model,
            Duration::from_secs(config.request_timeout_secs),
        )?
        .with_temperature(config.temperature)
        .with_streaming(config.stream);

        Ok(match config.max_tokens {
            Some(max) => client.with_max_tokens(max),
            None => client,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Use SSE streaming; content deltas are published as token events.
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    fn request_body(&self, request: &ModelRequest<'_>) -> serde_json::Value {
        let system = system_prompt(
            &SystemContext::current(),
            request.catalog,
            request.respond_language,
        );

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": to_api_messages(system, request.history),
            "tools": api_tools(request.catalog),
            "temperature": self.temperature,
            "stream": self.stream,
        });

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }

    async fn read_streamed(&self, response: reqwest::Response) -> Result<ApiMessage, ModelError> {
        let mut byte_stream = response.bytes_stream();
        let mut accumulator = SseAccumulator::default();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk
                .map_err(|e| ModelError::Unavailable(format!("Stream interrupted: {e}")))?;
            for delta in accumulator.feed(&bytes) {
                if let Some(bus) = &self.event_bus {
                    bus.publish(DomainEvent::Token { text: delta });
                }
            }
            if accumulator.is_done() {
                break;
            }
        }

        Ok(accumulator.finish())
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn infer(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request);

        debug!(
            model = %self.model,
            turns = request.history.len(),
            tools = request.catalog.len(),
            stream = self.stream,
            "Sending completion request"
        );

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        if self.stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ModelError::Unavailable(format!("Request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %error_body, "Model endpoint returned error");
            let reason = match status.as_u16() {
                401 | 403 => "authentication failed".to_string(),
                429 => "rate limited".to_string(),
                _ => error_body,
            };
            return Err(ModelError::Unavailable(format!("HTTP {}: {reason}", status.as_u16())));
        }

        let message = if self.stream {
            self.read_streamed(response).await?
        } else {
            let api_response: ApiResponse = response
                .json()
                .await
                .map_err(|e| ModelError::Protocol(format!("Failed to parse response: {e}")))?;
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ModelError::Protocol("No choices in response".into()))?
                .message
        };

        parse_message(message, request.catalog)
    }
}

// --- History -> API messages ---

/// Replay the history as chat messages, system prompt first.
///
/// Consecutive tool call requests share one assistant message. A request
/// whose result never made it into the history gets a placeholder tool
/// message so the endpoint always sees complete call/result pairs.
fn to_api_messages(system: String, history: &[Turn]) -> Vec<ApiMessage> {
    let mut messages = vec![ApiMessage::text("system", system)];
    let mut pending: Vec<ApiToolCall> = Vec::new();
    let mut open: Vec<String> = Vec::new();

    for turn in history {
        if !matches!(turn, Turn::ToolCallRequest(_)) && !pending.is_empty() {
            messages.push(ApiMessage::tool_calls(std::mem::take(&mut pending)));
        }
        if !matches!(turn, Turn::ToolCallRequest(_) | Turn::ToolCallResult(_)) {
            close_open_calls(&mut messages, &mut open);
        }

        match turn {
            Turn::UserMessage(text) => messages.push(ApiMessage::text("user", text.clone())),
            Turn::AssistantMessage(text) => {
                messages.push(ApiMessage::text("assistant", text.clone()))
            }
            Turn::ToolCallRequest(call) => {
                open.push(call.call_id.clone());
                pending.push(to_api_call(call));
            }
            Turn::ToolCallResult(result) => {
                let Some(pos) = open.iter().position(|id| *id == result.call_id) else {
                    debug!(call_id = %result.call_id, "Skipping tool result without a request");
                    continue;
                };
                open.remove(pos);
                messages.push(ApiMessage::tool_result(&result.call_id, render_result(result)));
            }
            Turn::Cancelled => messages.push(ApiMessage::text("assistant", CANCELLED_NOTE.into())),
        }
    }

    if !pending.is_empty() {
        messages.push(ApiMessage::tool_calls(pending));
    }
    close_open_calls(&mut messages, &mut open);
    messages
}

fn close_open_calls(messages: &mut Vec<ApiMessage>, open: &mut Vec<String>) {
    for call_id in open.drain(..) {
        let content = serde_json::json!({ "status": "no_result_recorded" }).to_string();
        messages.push(ApiMessage::tool_result(&call_id, content));
    }
}

fn to_api_call(call: &ToolCall) -> ApiToolCall {
    let (name, arguments) = match call.purpose {
        CallPurpose::Execute => {
            let mut args = serde_json::json!({
                "command": call.tool_name,
                "args": call.arguments,
            });
            if let Some(dir) = &call.work_dir {
                args["work_dir"] = serde_json::json!(dir.display().to_string());
            }
            (EXECUTE_COMMAND, args)
        }
        CallPurpose::Help => {
            // Help calls are stored as `[sub_command] <help_flag>`
            let mut args = serde_json::json!({ "command": call.tool_name });
            if call.arguments.len() > 1 {
                args["sub_command"] = serde_json::json!(call.arguments[0]);
            }
            (GET_TOOL_HELP, args)
        }
    };

    ApiToolCall {
        id: call.call_id.clone(),
        r#type: "function".into(),
        function: ApiFunction {
            name: name.into(),
            arguments: arguments.to_string(),
        },
    }
}

/// JSON rendering of a tool result, as the model sees it.
fn render_result(result: &ToolResult) -> String {
    let mut rendered = serde_json::json!({
        "status": result.status,
        "stdout": result.stdout,
        "stderr": result.stderr,
    });
    if let Some(code) = result.exit_code() {
        rendered["exit_code"] = serde_json::json!(code);
    }
    if result.truncated {
        rendered["truncated"] = serde_json::json!(true);
    }
    rendered.to_string()
}

fn api_tools(catalog: &[ToolDescriptor]) -> Vec<ApiToolDefinition> {
    let names = catalog
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    vec![
        ApiToolDefinition {
            r#type: "function".into(),
            function: ApiToolFunction {
                name: EXECUTE_COMMAND.into(),
                description: "Run a command-line tool with the given arguments. \
                              The program is started directly, not through a shell."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "command": {
                            "type": "string",
                            "description": format!("Tool to run, one of: {names}"),
                        },
                        "args": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Arguments passed to the tool, one element per argument",
                        },
                        "work_dir": {
                            "type": "string",
                            "description": "Working directory; defaults to the current directory",
                        },
                    },
                    "required": ["command", "args"],
                }),
            },
        },
        ApiToolDefinition {
            r#type: "function".into(),
            function: ApiToolFunction {
                name: GET_TOOL_HELP.into(),
                description: "Show the usage documentation of a command-line tool.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "command": {
                            "type": "string",
                            "description": format!("Tool to document, one of: {names}"),
                        },
                        "sub_command": {
                            "type": "string",
                            "description": "Optional sub-command, e.g. `commit` for git",
                        },
                    },
                    "required": ["command"],
                }),
            },
        },
    ]
}

// --- API message -> ModelResponse ---

#[derive(Debug, Deserialize)]
struct ExecuteArgs {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    work_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelpArgs {
    command: String,
    #[serde(default)]
    sub_command: Option<String>,
}

/// Interpret an assistant message.
///
/// Tool calls win over text. Missing or repeated call ids are replaced.
fn parse_message(
    message: ApiMessage,
    catalog: &[ToolDescriptor],
) -> Result<ModelResponse, ModelError> {
    let api_calls = message.tool_calls.unwrap_or_default();

    if api_calls.is_empty() {
        let text = message.content.unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ModelError::Protocol(
                "Response had neither content nor tool calls".into(),
            ));
        }
        return Ok(ModelResponse::FinalAnswer(text));
    }

    let mut seen = HashSet::new();
    let mut calls = Vec::with_capacity(api_calls.len());
    for api_call in api_calls {
        let id = if api_call.id.is_empty() || seen.contains(&api_call.id) {
            let generated = format!("call_{}", uuid::Uuid::new_v4().simple());
            debug!(original = %api_call.id, generated = %generated, "Replacing tool call id");
            generated
        } else {
            api_call.id
        };
        seen.insert(id.clone());
        calls.push(parse_call(id, &api_call.function, catalog)?);
    }

    Ok(ModelResponse::ToolCalls(calls))
}

fn parse_call(
    id: String,
    function: &ApiFunction,
    catalog: &[ToolDescriptor],
) -> Result<ToolCall, ModelError> {
    let bad_args = |e: serde_json::Error| {
        ModelError::Protocol(format!("Invalid arguments for {}: {e}", function.name))
    };

    match function.name.as_str() {
        EXECUTE_COMMAND => {
            let args: ExecuteArgs = serde_json::from_str(&function.arguments).map_err(bad_args)?;
            let call = ToolCall::new(id, args.command, args.args);
            Ok(match args.work_dir.filter(|d| !d.trim().is_empty()) {
                Some(dir) => call.with_work_dir(dir),
                None => call,
            })
        }
        GET_TOOL_HELP => {
            let args: HelpArgs = serde_json::from_str(&function.arguments).map_err(bad_args)?;
            let help_flag = catalog
                .iter()
                .find(|t| t.name == args.command)
                .map(|t| t.help_flag())
                .unwrap_or(DEFAULT_HELP_ARG);
            let sub_command = args.sub_command.filter(|s| !s.trim().is_empty());
            Ok(ToolCall::help(id, args.command, sub_command, help_flag))
        }
        // Resolved by the loop like any other name; unknown ones become data
        other => {
            warn!(function = %other, "Model called a function it was not offered");
            Ok(ToolCall::new(id, other, Vec::new()))
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct ApiMessage {
    pub(crate) role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: String) -> Self {
        Self {
            role: role.into(),
            content: Some(content),
            ..Default::default()
        }
    }

    fn tool_calls(calls: Vec<ApiToolCall>) -> Self {
        Self {
            role: "assistant".into(),
            tool_calls: Some(calls),
            ..Default::default()
        }
    }

    fn tool_result(call_id: &str, content: String) -> Self {
        Self {
            role: "tool".into(),
            content: Some(content),
            tool_call_id: Some(call_id.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiToolCall {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default = "function_type")]
    pub(crate) r#type: String,
    pub(crate) function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiFunction {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}
