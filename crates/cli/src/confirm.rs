//! Terminal approval prompt.
//!
//! Prints the pending command on stderr and reads one line of input. End of
//! input, a read error, or a cancellation while waiting all count as no
//! answer, which the approval gate treats as a denial.

use async_trait::async_trait;
use cliz_core::approval::Confirm;
use cliz_core::tool::{ToolCall, ToolDescriptor};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stderr, Stdin};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub type TerminalConfirm = PromptConfirm<BufReader<Stdin>, Stderr>;

impl TerminalConfirm {
    pub fn terminal(cancel: CancellationToken) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stderr(), cancel)
    }
}

pub struct PromptConfirm<R, W> {
    input: Mutex<R>,
    output: Mutex<W>,
    cancel: CancellationToken,
}

impl<R, W> PromptConfirm<R, W> {
    pub fn new(input: R, output: W, cancel: CancellationToken) -> Self {
        Self {
            input: Mutex::new(input),
            output: Mutex::new(output),
            cancel,
        }
    }
}

#[async_trait]
impl<R, W> Confirm for PromptConfirm<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn ask(&self, call: &ToolCall, descriptor: &ToolDescriptor) -> Option<String> {
        let prompt = render_prompt(call, descriptor);
        {
            let mut output = self.output.lock().await;
            if let Err(e) = output.write_all(prompt.as_bytes()).await {
                warn!(error = %e, "Failed to write approval prompt");
            }
            let _ = output.flush().await;
        }

        let mut input = self.input.lock().await;
        let mut line = String::new();
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            read = input.read_line(&mut line) => match read {
                Ok(0) => None,
                Ok(_) => Some(line),
                Err(e) => {
                    warn!(error = %e, "Failed to read approval answer");
                    None
                }
            },
        }
    }
}

fn render_prompt(call: &ToolCall, descriptor: &ToolDescriptor) -> String {
    let mut command = vec![call.tool_name.clone()];
    command.extend(call.arguments.iter().map(|a| quote(a)));

    let mut prompt = format!("\nAbout to run: {}\n", command.join(" "));
    if !descriptor.description.is_empty() {
        prompt.push_str(&format!("  ({}: {})\n", descriptor.name, descriptor.description));
    }
    if let Some(dir) = &call.work_dir {
        prompt.push_str(&format!("  in {}\n", dir.display()));
    }
    prompt.push_str("Do you want to continue? [y/N] ");
    prompt
}

/// Make argument boundaries visible; arguments never pass through a shell.
fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        format!("{arg:?}")
    } else {
        arg.to_string()
    }
}
