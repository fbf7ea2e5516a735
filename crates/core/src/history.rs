//! Conversation history and session domain types.
//!
//! A session is an ordered, append-only list of [`Turn`]s. The order is the
//! conversation order and is replayed to the model as-is:
//! User instruction → model reasoning → tool calls/results → final answer.

use crate::tool::{ToolCall, ToolResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One atomic record in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Turn {
    UserMessage(String),
    AssistantMessage(String),
    ToolCallRequest(ToolCall),
    ToolCallResult(ToolResult),
    /// The user interrupted the turn before the model answered
    Cancelled,
}

impl Turn {
    /// Short lowercase label, used for logging and storage.
    pub fn kind(&self) -> &'static str {
        match self {
            Turn::UserMessage(_) => "user_message",
            Turn::AssistantMessage(_) => "assistant_message",
            Turn::ToolCallRequest(_) => "tool_call_request",
            Turn::ToolCallResult(_) => "tool_call_result",
            Turn::Cancelled => "cancelled",
        }
    }
}

/// Append-only log of turns for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a history from persisted turns.
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    /// Append a turn. There is no way to remove or reorder turns.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Whether a tool call with this id was already requested in the session.
    pub fn contains_call_id(&self, call_id: &str) -> bool {
        self.turns
            .iter()
            .any(|t| matches!(t, Turn::ToolCallRequest(call) if call.call_id == call_id))
    }

    /// The slice replayed to the model.
    ///
    /// The current run (from the last user message on) is always included.
    /// `previous_runs` bounds how many earlier runs come with it; `None`
    /// replays everything.
    pub fn view(&self, previous_runs: Option<usize>) -> &[Turn] {
        let Some(previous_runs) = previous_runs else {
            return &self.turns;
        };

        let start = self
            .turns
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, t)| matches!(t, Turn::UserMessage(_)))
            .nth(previous_runs)
            .map(|(i, _)| i)
            .unwrap_or(0);

        &self.turns[start..]
    }
}

/// Per-session settings captured at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Run tools without asking for confirmation
    pub auto: bool,

    /// Language directive handed to the model prompt
    pub respond_language: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auto: false,
            respond_language: "English".into(),
        }
    }
}

/// The single active session of the process.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub history: ConversationHistory,
    pub settings: SessionSettings,
}

impl Session {
    /// Start a session with empty history.
    pub fn new(id: SessionId, settings: SessionSettings) -> Self {
        Self {
            id,
            history: ConversationHistory::new(),
            settings,
        }
    }

    /// Resume a session from persisted turns.
    pub fn resume(id: SessionId, turns: Vec<Turn>, settings: SessionSettings) -> Self {
        Self {
            id,
            history: ConversationHistory::from_turns(turns),
            settings,
        }
    }
}
