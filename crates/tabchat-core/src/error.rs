use thiserror::Error;

use crate::models::TabId;
use crate::repositories::RepositoryError;
use crate::services::SyncError;

/// Errors surfaced by the engine's public API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The conversation was deleted, possibly from another context.
    #[error("Conversation not found: {id}")]
    NotFound { id: String },

    #[error("No state for tab {tab_id}")]
    UnknownTab { tab_id: TabId },

    /// Storage rejected the write; in-memory state was left untouched.
    #[error("Persistence failure: {0}")]
    Persistence(#[source] RepositoryError),

    /// Logged when the bus falls back to the settings transport; never
    /// returned to callers.
    #[error("Sync transport unavailable: {0}")]
    SyncUnavailable(#[from] SyncError),

    /// A subscriber panicked; caught and logged per listener.
    #[error("Listener fault: {message}")]
    ListenerFault { message: String },
}

impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { id } => EngineError::NotFound { id },
            other => EngineError::Persistence(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
