//! Error handling for the stock ledger
//!
//! Every error carries a stable code and an actionable message so callers can
//! surface "insufficient stock" rather than a generic failure.

use serde::Serialize;
use shared::{BalanceError, CodeError, CostError};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Input errors
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    // Stock errors
    #[error("Insufficient stock for {item_code}: requested {requested}, available {available}")]
    InsufficientStock {
        item_code: String,
        available: i64,
        requested: i64,
    },

    #[error("Return of {requested} exceeds the {issued} still issued")]
    ReturnExceedsIssued { issued: i64, requested: i64 },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    // Concurrency errors
    #[error("Busy: {0}")]
    Busy(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serializable error detail for presentation layers
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl AppError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidQuantity(_) => "INVALID_QUANTITY",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::ReturnExceedsIssued { .. } => "RETURN_EXCEEDS_ISSUED",
            AppError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DuplicateEntry(_) => "DUPLICATE_ENTRY",
            AppError::Busy(_) => "BUSY",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Busy(_))
    }

    pub fn detail(&self) -> ErrorDetail {
        let (message, field) = match self {
            AppError::InvalidQuantity(msg) => (msg.clone(), Some("quantity".to_string())),
            AppError::Validation { field, message } => (message.clone(), Some(field.clone())),
            AppError::InsufficientStock {
                item_code,
                available,
                requested,
            } => (
                format!(
                    "Insufficient stock for item {}: {} requested but only {} available",
                    item_code, requested, available
                ),
                Some("quantity".to_string()),
            ),
            AppError::ReturnExceedsIssued { issued, requested } => (
                format!(
                    "Cannot return {} units; only {} remain issued to this project",
                    requested, issued
                ),
                Some("quantity".to_string()),
            ),
            AppError::InvariantViolation(msg) => (
                format!("Stock ledger rule violated: {}", msg),
                None,
            ),
            AppError::NotFound(resource) => (format!("{} not found", resource), None),
            AppError::DuplicateEntry(code) => (
                format!("Item code {} is already in use", code),
                Some("item_code".to_string()),
            ),
            AppError::Busy(msg) => (
                format!("The stock record is busy, please retry: {}", msg),
                None,
            ),
            AppError::Configuration(msg) => (format!("Configuration error: {}", msg), None),
            AppError::DatabaseError(_) => ("A database error occurred".to_string(), None),
            AppError::Internal(msg) => (msg.clone(), None),
        };

        ErrorDetail {
            code: self.code().to_string(),
            message,
            field,
        }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Map a validator report onto the first failing field
    pub fn from_validation(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "input".to_string());
        AppError::Validation {
            field,
            message: errors.to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                // lock_not_available, serialization_failure, deadlock_detected
                Some("55P03") | Some("40001") | Some("40P01") => {
                    return AppError::Busy(db_err.message().to_string())
                }
                // check_violation
                Some("23514") => return AppError::InvariantViolation(db_err.message().to_string()),
                // foreign_key_violation
                Some("23503") => return AppError::NotFound(db_err.message().to_string()),
                _ => {}
            }
        }
        AppError::DatabaseError(err)
    }
}

impl From<BalanceError> for AppError {
    fn from(err: BalanceError) -> Self {
        AppError::InvariantViolation(err.to_string())
    }
}

impl From<CostError> for AppError {
    fn from(err: CostError) -> Self {
        AppError::InvalidQuantity(err.to_string())
    }
}

impl From<CodeError> for AppError {
    fn from(err: CodeError) -> Self {
        match err {
            CodeError::Collision(code) => AppError::DuplicateEntry(code),
            CodeError::Invalid(msg) => AppError::Validation {
                field: "item_code".to_string(),
                message: msg.to_string(),
            },
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias for services
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_detail() {
        let err = AppError::InsufficientStock {
            item_code: "100".to_string(),
            available: 2,
            requested: 5,
        };
        let detail = err.detail();
        assert_eq!(detail.code, "INSUFFICIENT_STOCK");
        assert!(detail.message.contains("only 2 available"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_balance_error_is_invariant_violation() {
        let err: AppError = shared::next_balance(1, 0, 2).unwrap_err().into();
        assert_eq!(err.code(), "INVARIANT_VIOLATION");
    }

    #[test]
    fn test_cost_overflow_is_invalid_quantity() {
        let err: AppError = shared::extended_cost(i64::MAX, rust_decimal::Decimal::MAX)
            .unwrap_err()
            .into();
        assert_eq!(err.code(), "INVALID_QUANTITY");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_code_collision_maps_to_duplicate() {
        let err: AppError = CodeError::Collision("101".to_string()).into();
        assert!(matches!(err, AppError::DuplicateEntry(code) if code == "101"));
    }
}
