//! Approval gate: decides whether a tool call may run.
//!
//! In `Auto` mode every call is approved. In `Manual` mode the user is asked
//! through a [`Confirm`] implementation (the terminal, in the CLI) and only an
//! explicit "yes" approves the call.

use crate::tool::{CallPurpose, ToolCall, ToolDescriptor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Approval mode, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    Auto,
    #[default]
    Manual,
}

impl ApprovalMode {
    /// `--auto` on the command line wins over the configured default.
    pub fn resolve(config_auto: bool, cli_auto: bool) -> Self {
        if cli_auto || config_auto {
            ApprovalMode::Auto
        } else {
            ApprovalMode::Manual
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Denied,
}

/// Asks a human about a pending tool call.
#[async_trait]
pub trait Confirm: Send + Sync {
    /// Present the call and return the raw answer, `None` on end of input.
    ///
    /// May block for as long as the user takes.
    async fn ask(&self, call: &ToolCall, descriptor: &ToolDescriptor) -> Option<String>;
}

/// `y` and `yes`, case-insensitive, surrounding whitespace ignored.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

pub struct ApprovalGate {
    mode: ApprovalMode,
    confirm: Arc<dyn Confirm>,
}

impl ApprovalGate {
    pub fn new(mode: ApprovalMode, confirm: Arc<dyn Confirm>) -> Self {
        Self { mode, confirm }
    }

    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    /// Decide whether `call` may run.
    ///
    /// A help lookup passing nothing but the tool's own help flag is approved
    /// without asking. A lookup with a sub-command goes through the prompt,
    /// since the sub-command is a positional argument of the model's choosing.
    pub async fn authorize(&self, call: &ToolCall, descriptor: &ToolDescriptor) -> Decision {
        if self.mode == ApprovalMode::Auto || is_bare_help(call, descriptor) {
            debug!(tool = %call.tool_name, mode = ?self.mode, purpose = ?call.purpose, "Call approved without prompt");
            return Decision::Approved;
        }

        let decision = match self.confirm.ask(call, descriptor).await {
            Some(answer) if is_affirmative(&answer) => Decision::Approved,
            _ => Decision::Denied,
        };
        info!(tool = %call.tool_name, call_id = %call.call_id, ?decision, "User decision");
        decision
    }
}

fn is_bare_help(call: &ToolCall, descriptor: &ToolDescriptor) -> bool {
    call.purpose == CallPurpose::Help
        && call.work_dir.is_none()
        && matches!(call.arguments.as_slice(), [flag] if flag == descriptor.help_flag())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replies with scripted answers and records what it was asked.
    struct Scripted {
        answers: Mutex<Vec<Option<String>>>,
        asked: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(answers: Vec<Option<&str>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into_iter().rev().map(|a| a.map(String::from)).collect()),
                asked: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Confirm for Scripted {
        async fn ask(&self, call: &ToolCall, _descriptor: &ToolDescriptor) -> Option<String> {
            self.asked.lock().unwrap().push(call.command_line());
            self.answers.lock().unwrap().pop().flatten()
        }
    }

    /// Fails the test if the gate ever prompts.
    struct NeverAsk;

    #[async_trait]
    impl Confirm for NeverAsk {
        async fn ask(&self, call: &ToolCall, _descriptor: &ToolDescriptor) -> Option<String> {
            panic!("unexpected prompt for {}", call.command_line());
        }
    }

    fn rm_call() -> (ToolCall, ToolDescriptor) {
        (
            ToolCall::new("c1", "rm", vec!["-rf".into(), "target".into()]),
            ToolDescriptor::new("rm", "Remove files"),
        )
    }

    #[tokio::test]
    async fn auto_mode_approves_without_prompt() {
        let gate = ApprovalGate::new(ApprovalMode::Auto, Arc::new(NeverAsk));
        let (call, descriptor) = rm_call();
        for _ in 0..3 {
            assert_eq!(gate.authorize(&call, &descriptor).await, Decision::Approved);
        }
    }

    #[tokio::test]
    async fn manual_mode_follows_answer() {
        let confirm = Scripted::new(vec![Some("y"), Some(" YES "), Some("n"), Some(""), Some("maybe"), None]);
        let gate = ApprovalGate::new(ApprovalMode::Manual, confirm.clone());
        let (call, descriptor) = rm_call();

        let mut decisions = Vec::new();
        for _ in 0..6 {
            decisions.push(gate.authorize(&call, &descriptor).await);
        }
        assert_eq!(
            decisions,
            [
                Decision::Approved,
                Decision::Approved,
                Decision::Denied,
                Decision::Denied,
                Decision::Denied,
                Decision::Denied,
            ]
        );
        assert_eq!(confirm.asked.lock().unwrap()[0], "rm -rf target");
    }

    #[tokio::test]
    async fn help_lookups_skip_prompt() {
        let gate = ApprovalGate::new(ApprovalMode::Manual, Arc::new(NeverAsk));
        let call = ToolCall::help("c1", "git", None, "--help");
        let descriptor = ToolDescriptor::new("git", "Version control");
        assert_eq!(gate.authorize(&call, &descriptor).await, Decision::Approved);
    }

    #[tokio::test]
    async fn help_with_sub_command_is_prompted() {
        let confirm = Scripted::new(vec![Some("n")]);
        let gate = ApprovalGate::new(ApprovalMode::Manual, confirm.clone());
        let call = ToolCall::help("c1", "sh", Some("/tmp/payload.sh".into()), "-h");
        let descriptor = ToolDescriptor::new("sh", "POSIX shell");

        assert_eq!(gate.authorize(&call, &descriptor).await, Decision::Denied);
        assert_eq!(*confirm.asked.lock().unwrap(), ["sh /tmp/payload.sh -h"]);
    }

    #[tokio::test]
    async fn help_flag_must_match_descriptor() {
        let confirm = Scripted::new(vec![None, None]);
        let gate = ApprovalGate::new(ApprovalMode::Manual, confirm.clone());
        let descriptor = ToolDescriptor::new("git", "Version control").with_help_arg("--help");

        // Help purpose with another flag than the configured one
        let other_flag = ToolCall::help("c1", "git", None, "-c");
        assert_eq!(gate.authorize(&other_flag, &descriptor).await, Decision::Denied);

        let in_dir = ToolCall::help("c2", "git", None, "--help").with_work_dir("/srv");
        assert_eq!(gate.authorize(&in_dir, &descriptor).await, Decision::Denied);
        assert_eq!(confirm.asked.lock().unwrap().len(), 2);
    }

    #[test]
    fn cli_flag_overrides_config() {
        assert_eq!(ApprovalMode::resolve(false, true), ApprovalMode::Auto);
        assert_eq!(ApprovalMode::resolve(true, false), ApprovalMode::Auto);
        assert_eq!(ApprovalMode::resolve(false, false), ApprovalMode::Manual);
    }
}
