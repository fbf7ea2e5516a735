//! Error types for the cliz domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] is what a user turn
//! can end with.
//!
//! Errors that belong to a single tool call (unknown tool, denial, timeout,
//! spawn failure) never show up here: they are recorded as
//! [`ToolResult`](crate::tool::ToolResult) data and handed back to the model.

use thiserror::Error;

/// The top-level error type for a user turn.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model errors ---
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model protocol error: {0}")]
    ModelProtocol(String),

    // --- Loop control ---
    #[error("Tool loop did not converge after {limit} iterations")]
    LoopLimitExceeded { limit: u32 },

    #[error("Turn cancelled by user")]
    Cancelled,

    // --- Registry errors ---
    #[error("Tool registry error: {0}")]
    Registry(#[from] RegistryError),

    // --- History persistence ---
    #[error("History store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl Error {
    /// Process exit status the CLI reports for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config { .. } | Error::Registry(_) => 1,
            Error::ModelUnavailable(_) => 2,
            Error::ModelProtocol(_) => 3,
            Error::LoopLimitExceeded { .. } => 4,
            Error::Store(_) => 5,
            Error::Cancelled => 130,
        }
    }
}

impl From<ModelError> for Error {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Unavailable(msg) => Error::ModelUnavailable(msg),
            ModelError::Protocol(msg) => Error::ModelProtocol(msg),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// Transport or provider failure (network, auth, rate limit, 5xx).
    #[error("{0}")]
    Unavailable(String),

    /// The provider answered, but the answer is not a usable response.
    #[error("{0}")]
    Protocol(String),
}

impl ModelError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ModelError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted history record: {0}")]
    Corrupted(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}
