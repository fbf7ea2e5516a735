//! Tool execution for cliz.
//!
//! Tools are plain command-line programs named in the configuration. The
//! [`ToolExecutor`] resolves a model's tool call against the registry, runs
//! the program, and turns every outcome (success, failure, timeout, missing
//! binary) into a [`ToolResult`](cliz_core::ToolResult) the model can read.

pub mod executor;

pub use executor::{DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT, ToolExecutor};
