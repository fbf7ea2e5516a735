//! ModelClient trait: the abstraction over the language model.
//!
//! The agent loop hands a model client the replayable history and the tool
//! catalog, and gets back either a final answer or tool calls. How the client
//! talks to its provider (HTTP, streaming, prompt layout) is its own business.

use crate::error::ModelError;
use crate::history::Turn;
use crate::tool::{ToolCall, ToolDescriptor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Everything a model client needs for one inference.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    /// History slice replayed to the model, oldest first
    pub history: &'a [Turn],

    /// Tools the model may call, in registration order
    pub catalog: &'a [ToolDescriptor],

    /// Language the final answer should be written in
    pub respond_language: &'a str,
}

/// What the model decided to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ModelResponse {
    FinalAnswer(String),
    /// Calls in the order the model emitted them; never empty
    ToolCalls(Vec<ToolCall>),
}

/// The core ModelClient trait.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openai").
    fn name(&self) -> &str;

    /// Run one inference.
    ///
    /// Transport/provider failures are [`ModelError::Unavailable`]; answers
    /// that cannot be read as a [`ModelResponse`] are [`ModelError::Protocol`].
    async fn infer(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_response_serialization() {
        let resp = ModelResponse::ToolCalls(vec![ToolCall::new("c1", "ls", vec!["/tmp".into()])]);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("tool_calls"));
        assert!(json.contains("/tmp"));
    }
}
