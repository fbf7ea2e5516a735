//! Session persistence for cliz.
//!
//! Every store implements [`cliz_core::SessionStore`]: an append-only log of
//! turns keyed by session id, replayed in order on load.

pub mod in_memory;
pub mod jsonl;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use jsonl::JsonlStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
