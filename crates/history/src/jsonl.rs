//! JSON-lines session store, one human-inspectable file per session.
//!
//! Storage location: `~/.cliz/sessions/<session-id>.jsonl`, one JSON-encoded
//! [`Turn`] per line. Appends open the file in append mode and `fsync` before
//! returning.

use async_trait::async_trait;
use cliz_core::error::StoreError;
use cliz_core::history::{SessionId, Turn};
use cliz_core::store::SessionStore;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

const EXTENSION: &str = "jsonl";

pub struct JsonlStore {
    dir: PathBuf,
}

impl JsonlStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn session_path(&self, session: &SessionId) -> Result<PathBuf, StoreError> {
        let id = session.as_str();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !id.starts_with('.');
        if !valid {
            return Err(StoreError::Storage(format!(
                "Session id '{id}' cannot be used as a file name"
            )));
        }
        Ok(self.dir.join(format!("{id}.{EXTENSION}")))
    }
}

#[async_trait]
impl SessionStore for JsonlStore {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn append(&self, session: &SessionId, turn: &Turn) -> Result<(), StoreError> {
        let path = self.session_path(session)?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StoreError::Storage(format!("Failed to create history directory: {e}"))
        })?;

        let mut line = serde_json::to_string(turn)
            .map_err(|e| StoreError::Storage(format!("Turn serialization: {e}")))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open {}: {e}", path.display())))?;
        drop_torn_tail(&mut file, &path).await?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to write history: {e}")))?;
        file.sync_data()
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to sync history: {e}")))?;

        debug!(session = %session, kind = turn.kind(), "Turn persisted");
        Ok(())
    }

    async fn load(&self, session: &SessionId) -> Result<Vec<Turn>, StoreError> {
        let path = self.session_path(session)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let complete = content.ends_with('\n');
        let lines: Vec<&str> = content.lines().collect();
        let mut turns = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Turn>(line) {
                Ok(turn) => turns.push(turn),
                // A torn final line is what an interrupted append leaves behind
                Err(e) if i + 1 == lines.len() && !complete => {
                    warn!(path = %path.display(), error = %e, "Skipping incomplete last history line");
                }
                Err(e) => {
                    return Err(StoreError::Corrupted(format!(
                        "{} line {}: {e}",
                        path.display(),
                        i + 1
                    )));
                }
            }
        }
        Ok(turns)
    }

    async fn clear(&self, session: &SessionId) -> Result<(), StoreError> {
        let path = self.session_path(session)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Storage(format!(
                "Failed to remove {}: {e}",
                path.display()
            ))),
        }
    }

    async fn sessions(&self) -> Result<Vec<SessionId>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Storage(format!("Failed to list sessions: {e}"))),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to list sessions: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(SessionId::from(stem));
                }
            }
        }
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ids)
    }
}

/// Cut an unterminated last line left by an interrupted append, so the next
/// record starts on a line of its own.
async fn drop_torn_tail(file: &mut tokio::fs::File, path: &Path) -> Result<(), StoreError> {
    let io_err = |e: std::io::Error| {
        StoreError::Storage(format!("Failed to repair {}: {e}", path.display()))
    };

    let len = file.metadata().await.map_err(io_err)?.len();
    if len == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1)).await.map_err(io_err)?;
    file.read_exact(&mut last).await.map_err(io_err)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut content = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0)).await.map_err(io_err)?;
    file.read_to_end(&mut content).await.map_err(io_err)?;
    let keep = content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i + 1);
    warn!(
        path = %path.display(),
        dropped_bytes = content.len() - keep,
        "Dropping incomplete last history line"
    );
    file.set_len(keep as u64).await.map_err(io_err)?;
    Ok(())
}
