//! Tool domain types and the tool registry.
//!
//! A tool is an external command-line program listed in the configuration.
//! The model picks tools by name; names are resolved through the
//! [`ToolRegistry`], so a tool the model invents is a data-level error
//! ([`RegistryError::UnknownTool`]) rather than a crash.

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Help flag used when a descriptor does not name one.
pub const DEFAULT_HELP_ARG: &str = "-h";

/// A configured command-line tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Executable name (looked up on `PATH`)
    pub name: String,

    /// Summary shown to the model
    #[serde(default)]
    pub description: String,

    /// Flag that makes the tool print its own usage, e.g. `--help`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_arg: Option<String>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            help_arg: None,
        }
    }

    pub fn with_help_arg(mut self, help_arg: impl Into<String>) -> Self {
        self.help_arg = Some(help_arg.into());
        self
    }

    /// The flag to pass for self-documentation.
    pub fn help_flag(&self) -> &str {
        self.help_arg.as_deref().unwrap_or(DEFAULT_HELP_ARG)
    }
}

/// Why the model asked for a tool call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPurpose {
    /// Run the tool with the model's arguments.
    #[default]
    Execute,
    /// Run the tool with its help flag only.
    Help,
}

/// A request, emitted by the model, to run a registered tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlates this call with its result
    pub call_id: String,

    /// Name of the tool to run
    pub tool_name: String,

    /// Arguments, passed to the process verbatim (no shell)
    #[serde(default)]
    pub arguments: Vec<String>,

    #[serde(default)]
    pub purpose: CallPurpose,

    /// Working directory for the process; current directory when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

impl ToolCall {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Vec<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            purpose: CallPurpose::Execute,
            work_dir: None,
        }
    }

    /// A help lookup: `<tool> [sub_command] <help_flag>`.
    pub fn help(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        sub_command: Option<String>,
        help_flag: &str,
    ) -> Self {
        let mut arguments: Vec<String> = sub_command.into_iter().collect();
        arguments.push(help_flag.to_string());
        Self {
            purpose: CallPurpose::Help,
            ..Self::new(call_id, tool_name, arguments)
        }
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// The command line as a user would type it.
    pub fn command_line(&self) -> String {
        std::iter::once(self.tool_name.as_str())
            .chain(self.arguments.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Why a process could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnFailure {
    NotFound,
    PermissionDenied,
    Other,
}

/// How a tool call ended.
///
/// Only [`ToolStatus::Exited`] carries a process exit code; every other
/// variant is a sentinel recorded by the agent itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolStatus {
    Exited { code: i32 },
    /// Terminated by a signal, no exit code
    Signaled,
    /// The user declined the call
    Denied,
    /// Killed after exceeding the execution timeout
    TimedOut,
    /// The name does not resolve in the registry
    UnknownTool,
    SpawnFailed { reason: SpawnFailure },
}

/// The outcome of one tool call. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,

    pub status: ToolStatus,

    #[serde(default)]
    pub stdout: String,

    #[serde(default)]
    pub stderr: String,

    /// Set when stdout or stderr hit the output cap
    #[serde(default)]
    pub truncated: bool,

    #[serde(default)]
    pub duration_ms: u64,
}

impl ToolResult {
    fn note(call_id: &str, status: ToolStatus, stderr: String) -> Self {
        Self {
            call_id: call_id.to_string(),
            status,
            stdout: String::new(),
            stderr,
            truncated: false,
            duration_ms: 0,
        }
    }

    /// Result for a call the user declined.
    pub fn denied(call: &ToolCall) -> Self {
        Self::note(
            &call.call_id,
            ToolStatus::Denied,
            format!(
                "Execution of `{}` was denied by the user. Do not retry the same command; \
                 try another approach or ask the user.",
                call.command_line()
            ),
        )
    }

    /// Result for a tool name missing from the registry.
    pub fn unknown_tool(call: &ToolCall, known: &[&str]) -> Self {
        Self::note(
            &call.call_id,
            ToolStatus::UnknownTool,
            format!(
                "Unknown tool '{}'. Available tools: {}",
                call.tool_name,
                if known.is_empty() { "(none)".to_string() } else { known.join(", ") }
            ),
        )
    }

    /// Result for a process killed at the timeout.
    pub fn timed_out(call: &ToolCall, timeout_secs: u64) -> Self {
        Self::note(
            &call.call_id,
            ToolStatus::TimedOut,
            format!("`{}` timed out after {timeout_secs}s and was killed", call.command_line()),
        )
    }

    /// Result for a process that could not be started.
    pub fn spawn_failed(call: &ToolCall, reason: SpawnFailure, detail: impl std::fmt::Display) -> Self {
        Self::note(
            &call.call_id,
            ToolStatus::SpawnFailed { reason },
            format!("Failed to start `{}`: {detail}", call.tool_name),
        )
    }

    /// The process exit code, if the process exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ToolStatus::Exited { code } => Some(code),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == Some(0)
    }
}

/// The registered tools, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured descriptors, failing on the first duplicate.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ToolDescriptor>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Register a tool. Names must be unique.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name));
        }
        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(descriptor);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn resolve(&self, name: &str) -> Result<&ToolDescriptor, RegistryError> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    /// All descriptors in registration order (for the model prompt).
    pub fn catalog(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
