use thiserror::Error;

#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum RepositoryError {
    #[error("Conversation not found: {id}")]
    NotFound { id: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Repository initialization failed: {message}")]
    InitializationError { message: String },

    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl RepositoryError {
    pub fn not_found(id: &str) -> Self {
        RepositoryError::NotFound { id: id.to_string() }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
