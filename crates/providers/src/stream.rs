//! Server-sent event accumulation for streamed chat completions.
//!
//! Content deltas are handed back as they arrive; tool call deltas arrive in
//! fragments keyed by index and are stitched together. At the end the
//! accumulator yields the same assistant message a non-streamed response
//! would have carried.

use crate::openai_compat::{ApiFunction, ApiMessage, ApiToolCall};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::trace;

#[derive(Debug, Default)]
pub(crate) struct SseAccumulator {
    buffer: Vec<u8>,
    content: String,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    done: bool,
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl SseAccumulator {
    /// Feed raw bytes; returns the content deltas completed by them.
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut deltas = Vec::new();

        // Split on raw bytes so multi-byte characters survive chunk boundaries
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(delta) = self.line(line.trim_end_matches(['\r', '\n'])) {
                deltas.push(delta);
            }
        }
        deltas
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    /// The assembled assistant message, tool calls in index order.
    pub(crate) fn finish(mut self) -> ApiMessage {
        if !self.buffer.is_empty() {
            let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
            self.line(rest.trim());
        }

        let tool_calls: Vec<ApiToolCall> = self
            .tool_calls
            .into_values()
            .map(|acc| ApiToolCall {
                id: acc.id,
                r#type: "function".into(),
                function: ApiFunction {
                    name: acc.name,
                    arguments: acc.arguments,
                },
            })
            .collect();

        ApiMessage {
            role: "assistant".into(),
            content: (!self.content.is_empty()).then_some(self.content),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
        }
    }

    fn line(&mut self, line: &str) -> Option<String> {
        // Skip blank lines and SSE comments
        if line.is_empty() || line.starts_with(':') {
            return None;
        }
        let data = line.strip_prefix("data:")?.trim();
        if data == "[DONE]" {
            self.done = true;
            return None;
        }

        let chunk: StreamResponse = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                return None;
            }
        };

        let choice = chunk.choices.into_iter().next()?;
        for delta in choice.delta.tool_calls.unwrap_or_default() {
            let acc = self.tool_calls.entry(delta.index).or_default();
            if let Some(id) = delta.id {
                acc.id = id;
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    acc.name = name;
                }
                if let Some(arguments) = function.arguments {
                    acc.arguments.push_str(&arguments);
                }
            }
        }

        let content = choice.delta.content.filter(|c| !c.is_empty())?;
        self.content.push_str(&content);
        Some(content)
    }
}

// --- Streaming SSE types ---

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
