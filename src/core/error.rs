use crate::core::types::RowId;
use crate::validation::IncompleteRow;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CanvasError {
    #[error("Validation failed for {} row(s): {}", .0.len(), describe_incomplete(.0))]
    Validation(Vec<IncompleteRow>),

    #[error("Row '{0}' not found")]
    RowNotFound(RowId),

    #[error("Remote record not found: {0}")]
    NotFound(String),

    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

pub type Result<T> = std::result::Result<T, CanvasError>;

impl CanvasError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// True for the "record no longer exists" class, which the save path
    /// recovers from by creating a fresh record.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Remote { status, .. } => *status == 404,
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

fn describe_incomplete(rows: &[IncompleteRow]) -> String {
    rows.iter()
        .map(IncompleteRow::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl<T> From<std::sync::PoisonError<T>> for CanvasError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
