//! SessionStore trait: durable storage for conversation history.
//!
//! A store keeps an append-only list of [`Turn`]s per session id. Appends are
//! durable when `append` returns, so the agent loop can rely on every decided
//! tool result surviving a crash.

use crate::error::StoreError;
use crate::history::{SessionId, Turn};
use async_trait::async_trait;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// A human-readable name for this backend (e.g., "sqlite", "jsonl").
    fn name(&self) -> &str;

    /// Append one turn to the end of a session.
    async fn append(&self, session: &SessionId, turn: &Turn) -> Result<(), StoreError>;

    /// All turns of a session, in append order. Unknown sessions are empty.
    async fn load(&self, session: &SessionId) -> Result<Vec<Turn>, StoreError>;

    /// Drop every turn of a session. Only called on explicit user request.
    async fn clear(&self, session: &SessionId) -> Result<(), StoreError>;

    /// Ids of all stored sessions.
    async fn sessions(&self) -> Result<Vec<SessionId>, StoreError>;
}
