//! Error types for the predictive insights pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Pipeline Taxonomy
    // =============================

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Enrichment failure: {0}")]
    EnrichmentFailure(String),

    // =============================
    // Domain Errors
    // =============================

    #[error("Invalid watchlist transition: {0}")]
    InvalidTransition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Coarse classification used when reporting stage failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SourceUnavailable,
    InsufficientData,
    InvalidConfiguration,
    PersistenceFailure,
    EnrichmentFailure,
    Domain,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::SourceUnavailable(_) | PipelineError::HttpError(_) => {
                ErrorKind::SourceUnavailable
            }
            PipelineError::InsufficientData(_) => ErrorKind::InsufficientData,
            PipelineError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            PipelineError::PersistenceFailure(_) | PipelineError::DatabaseError(_) => {
                ErrorKind::PersistenceFailure
            }
            PipelineError::EnrichmentFailure(_) => ErrorKind::EnrichmentFailure,
            _ => ErrorKind::Domain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            PipelineError::InvalidConfiguration("bad region".into()).kind(),
            ErrorKind::InvalidConfiguration
        );
        assert_eq!(
            PipelineError::DatabaseError(sqlx::Error::RowNotFound).kind(),
            ErrorKind::PersistenceFailure
        );
        assert_eq!(
            PipelineError::InvalidTransition("converted -> pending".into()).kind(),
            ErrorKind::Domain
        );
    }
}
