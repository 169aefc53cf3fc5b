//! Error types for recall operations.
//!
//! Compute paths (memory model, queue ordering, phrasing selection, ledger
//! arithmetic) never fail. Only write paths and storage access return
//! [`RecallError`].

use thiserror::Error;

/// Result type alias for recall operations.
pub type RecallResult<T> = Result<T, RecallError>;

/// Main error type for all recall operations.
#[derive(Error, Debug)]
pub enum RecallError {
    /// The subject does not exist.
    #[error("Item not found: {message}")]
    NotFound {
        message: String,
        code: ErrorCode,
        item_id: Option<String>,
    },

    /// The subject belongs to another owner.
    #[error("Ownership check failed: {message}")]
    Ownership {
        message: String,
        code: ErrorCode,
        item_id: String,
        owner_id: String,
    },

    /// The subject is archived or deleted and cannot be practiced.
    #[error("Item is not active: {message}")]
    Inactive {
        message: String,
        code: ErrorCode,
        item_id: String,
    },

    /// The subject changed between read and write.
    #[error("Concurrent update: {message}")]
    Conflict {
        message: String,
        code: ErrorCode,
        item_id: String,
    },

    /// Input validation failed.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        code: ErrorCode,
        suggestion: Option<String>,
    },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Periodic job scheduler failed.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Items (ITEM_xxx)
    ItemNotFound,
    ItemInactive,
    ItemConflict,

    // Ownership (OWN_xxx)
    OwnMismatch,

    // Validation (VAL_xxx)
    ValInvalidInput,

    // Database (DB_xxx)
    DbConnectionFailed,
    DbOperationFailed,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ItemNotFound => "ITEM_001",
            ErrorCode::ItemInactive => "ITEM_002",
            ErrorCode::ItemConflict => "ITEM_003",
            ErrorCode::OwnMismatch => "OWN_001",
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::DbConnectionFailed => "DB_001",
            ErrorCode::DbOperationFailed => "DB_002",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl RecallError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            suggestion: None,
        }
    }

    /// Create a validation error with suggestion.
    pub fn validation_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            suggestion: Some(suggestion.into()),
        }
    }

    /// Create a not found error.
    pub fn not_found(item_id: impl Into<String>) -> Self {
        let id = item_id.into();
        Self::NotFound {
            message: format!("Item with id '{}' not found", id),
            code: ErrorCode::ItemNotFound,
            item_id: Some(id),
        }
    }

    /// Create an ownership error naming the offending item.
    pub fn ownership(item_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        let item_id = item_id.into();
        let owner_id = owner_id.into();
        Self::Ownership {
            message: format!("Item '{}' is not owned by '{}'", item_id, owner_id),
            code: ErrorCode::OwnMismatch,
            item_id,
            owner_id,
        }
    }

    /// Create an inactive-item error.
    pub fn inactive(item_id: impl Into<String>) -> Self {
        let id = item_id.into();
        Self::Inactive {
            message: format!("Item '{}' is archived or deleted", id),
            code: ErrorCode::ItemInactive,
            item_id: id,
        }
    }

    /// Create a conflict error for an item answered concurrently.
    pub fn conflict(item_id: impl Into<String>) -> Self {
        let id = item_id.into();
        Self::Conflict {
            message: format!("Item '{}' was updated concurrently", id),
            code: ErrorCode::ItemConflict,
            item_id: id,
        }
    }

    /// Create an error for a store connection that cannot be used.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbConnectionFailed,
            source: None,
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbOperationFailed,
            source: None,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { code, .. } => *code,
            Self::Ownership { code, .. } => *code,
            Self::Inactive { code, .. } => *code,
            Self::Conflict { code, .. } => *code,
            Self::Validation { code, .. } => *code,
            Self::Database { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    /// Get a user-friendly suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::NotFound { .. } => Some("Please check the item ID and ensure it exists"),
            Self::Ownership { .. } => Some("Only the owner of an item can practice or modify it"),
            Self::Inactive { .. } => Some("Restore or unarchive the item before practicing it"),
            Self::Conflict { .. } => Some("Fetch the item again and resubmit the answer"),
            Self::Validation { suggestion, .. } => suggestion.as_deref(),
            _ => None,
        }
    }

    /// The item this error refers to, if any.
    pub fn item_id(&self) -> Option<&str> {
        match self {
            Self::NotFound { item_id, .. } => item_id.as_deref(),
            Self::Ownership { item_id, .. } => Some(item_id),
            Self::Inactive { item_id, .. } => Some(item_id),
            Self::Conflict { item_id, .. } => Some(item_id),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for RecallError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            code: ErrorCode::DbOperationFailed,
            source: Some(Box::new(err)),
        }
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for RecallError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        Self::Scheduler(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let err = RecallError::validation("Invalid input");
        assert_eq!(err.code(), ErrorCode::ValInvalidInput);
        assert!(err.to_string().contains("Invalid input"));
    }

    #[test]
    fn test_not_found_error() {
        let err = RecallError::not_found("item-1");
        assert_eq!(err.code(), ErrorCode::ItemNotFound);
        assert_eq!(err.item_id(), Some("item-1"));
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_ownership_error_names_item() {
        let err = RecallError::ownership("item-7", "alice");
        assert_eq!(err.code(), ErrorCode::OwnMismatch);
        assert_eq!(err.item_id(), Some("item-7"));
        assert!(err.to_string().contains("item-7"));
    }

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::ItemNotFound.as_str(), "ITEM_001");
        assert_eq!(ErrorCode::OwnMismatch.as_str(), "OWN_001");
    }
}
