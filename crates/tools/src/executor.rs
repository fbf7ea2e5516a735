//! Tool executor: run a configured command-line tool for a tool call.
//!
//! The tool runs as its own process (no shell), stdin closed. stdout and
//! stderr are captured separately and capped; the process is killed when it
//! outlives the timeout. Whatever happens, the caller gets a [`ToolResult`].

use cliz_core::tool::{SpawnFailure, ToolCall, ToolRegistry, ToolResult, ToolStatus};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Default wall-clock limit for one tool process.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cap on captured bytes per stream.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024;

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Set the execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-stream output cap, in bytes.
    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run a tool call to completion.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let descriptor = match self.registry.resolve(&call.tool_name) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(tool = %call.tool_name, error = %e, "Model requested an unregistered tool");
                return ToolResult::unknown_tool(call, &self.registry.names());
            }
        };

        debug!(call_id = %call.call_id, command = %call.command_line(), "Executing tool");

        let mut command = Command::new(&descriptor.name);
        command
            .args(&call.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &call.work_dir {
            command.current_dir(dir);
        }

        let start = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = match e.kind() {
                    std::io::ErrorKind::NotFound => SpawnFailure::NotFound,
                    std::io::ErrorKind::PermissionDenied => SpawnFailure::PermissionDenied,
                    _ => SpawnFailure::Other,
                };
                warn!(tool = %call.tool_name, ?reason, error = %e, "Failed to start tool");
                return ToolResult::spawn_failed(call, reason, e);
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = self.max_output_bytes;

        let finished = tokio::time::timeout(self.timeout, async {
            tokio::join!(
                read_capped(stdout, cap),
                read_capped(stderr, cap),
                child.wait()
            )
        })
        .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (stdout, stderr, status) = match finished {
            Ok(collected) => collected,
            Err(_) => {
                warn!(
                    tool = %call.tool_name,
                    timeout_secs = self.timeout.as_secs(),
                    "Tool timed out, killing process"
                );
                if let Err(e) = child.kill().await {
                    warn!(tool = %call.tool_name, error = %e, "Failed to kill timed out tool");
                }
                return ToolResult {
                    duration_ms,
                    ..ToolResult::timed_out(call, self.timeout.as_secs())
                };
            }
        };

        let status = match status {
            Ok(status) => match status.code() {
                Some(code) => ToolStatus::Exited { code },
                None => ToolStatus::Signaled,
            },
            Err(e) => {
                warn!(tool = %call.tool_name, error = %e, "Failed to wait for tool");
                return ToolResult::spawn_failed(call, SpawnFailure::Other, e);
            }
        };

        if status != (ToolStatus::Exited { code: 0 }) {
            warn!(command = %call.command_line(), ?status, "Tool failed");
        }

        let (stdout, stdout_cut) = stdout.into_text(cap);
        let (stderr, stderr_cut) = stderr.into_text(cap);
        ToolResult {
            call_id: call.call_id.clone(),
            status,
            truncated: stdout_cut || stderr_cut,
            stdout,
            stderr,
            duration_ms,
        }
    }
}

/// Bytes kept from one output stream.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    /// Decode as UTF-8 (lossy), never longer than `cap` bytes.
    ///
    /// Replacement characters take more room than the bytes they stand for,
    /// so decoding can shorten the text further; the flag reports any loss.
    fn into_text(self, cap: usize) -> (String, bool) {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        let mut truncated = self.truncated;
        if text.len() > cap {
            let mut end = cap;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
            truncated = true;
        }
        (text, truncated)
    }
}

/// Read a stream to EOF, keeping at most `cap` bytes.
///
/// Bytes past the cap are still drained so the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, cap: usize) -> Captured {
    let mut captured = Captured::default();
    let Some(mut reader) = reader else {
        return captured;
    };

    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Error reading tool output");
                break;
            }
        };
        let room = cap.saturating_sub(captured.bytes.len());
        if n > room {
            captured.bytes.extend_from_slice(&chunk[..room]);
            captured.truncated = true;
        } else {
            captured.bytes.extend_from_slice(&chunk[..n]);
        }
    }
    captured
}
