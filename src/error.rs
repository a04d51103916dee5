// Error taxonomy for the reimbursement core
// Validation and authorization failures are typed outcomes, never panics

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Client input malformed or violates a spending limit.
    /// The message is the human-readable reason surfaced to the caller.
    #[error("{0}")]
    Validation(String),

    /// Missing or insufficient role for the attempted operation.
    #[error("Unauthorized: {0}")]
    Authorization(String),

    #[error("Not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    /// Attempted transition on a claim already in a terminal state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// OCR / storage dependency failure.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        AppError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = AppError::validation("At least one expense is required");
        assert_eq!(err.to_string(), "At least one expense is required");
    }

    #[test]
    fn test_not_found_display() {
        let err = AppError::not_found("reimbursement", "abc-123");
        assert_eq!(err.to_string(), "Not found: reimbursement with id abc-123");
    }
}
