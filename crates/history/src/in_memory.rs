//! In-memory store for tests and sessions that are never written to disk.

use async_trait::async_trait;
use cliz_core::error::StoreError;
use cliz_core::history::{SessionId, Turn};
use cliz_core::store::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<SessionId, Vec<Turn>>>>,
    order: Arc<RwLock<Vec<SessionId>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(&self, session: &SessionId, turn: &Turn) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(session) {
            self.order.write().await.push(session.clone());
        }
        sessions.entry(session.clone()).or_default().push(turn.clone());
        Ok(())
    }

    async fn load(&self, session: &SessionId) -> Result<Vec<Turn>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear(&self, session: &SessionId) -> Result<(), StoreError> {
        self.sessions.write().await.remove(session);
        self.order.write().await.retain(|s| s != session);
        Ok(())
    }

    async fn sessions(&self) -> Result<Vec<SessionId>, StoreError> {
        Ok(self.order.read().await.clone())
    }
}
