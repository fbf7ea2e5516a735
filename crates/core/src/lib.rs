//! # cliz core
//!
//! Domain types, traits, and error definitions for the cliz command-line agent.
//! This crate has **no I/O of its own**: it defines the model that the other
//! crates implement against.
//!
//! Every collaborator of the agent loop is a trait or plain type here:
//! - [`ModelClient`]: the language model
//! - [`SessionStore`]: durable history
//! - [`Confirm`]: the human behind the approval gate
//!
//! Implementations live in their own crates, and tests swap in scripted ones.

pub mod approval;
pub mod error;
pub mod event;
pub mod history;
pub mod model;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use approval::{ApprovalGate, ApprovalMode, Confirm, Decision};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use history::{ConversationHistory, Session, SessionId, SessionSettings, Turn};
pub use model::{ModelClient, ModelRequest, ModelResponse};
pub use store::SessionStore;
pub use tool::{CallPurpose, ToolCall, ToolDescriptor, ToolRegistry, ToolResult, ToolStatus};
