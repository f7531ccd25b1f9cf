use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bigdecimal::BigDecimal;
use serde_json::json;
use thiserror::Error;

use crate::domain::TransactionStatus;
use crate::validation::ValidationError;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: BigDecimal,
        requested: BigDecimal,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid state: cannot {action} a transaction in status {status}")]
    InvalidState {
        action: &'static str,
        status: TransactionStatus,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::InvariantViolation(_) | LedgerError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
            LedgerError::Database(_) | LedgerError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ValidationError> for LedgerError {
    fn from(err: ValidationError) -> Self {
        LedgerError::Validation(err.to_string())
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_status_code() {
        let error = LedgerError::Validation("amount: must be positive".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_error_status_code() {
        let error = LedgerError::NotFound("transaction".to_string());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_insufficient_balance_status_code() {
        let error = LedgerError::InsufficientBalance {
            available: BigDecimal::from(200),
            requested: BigDecimal::from(300),
        };
        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            error.to_string(),
            "Insufficient balance: available 200, requested 300"
        );
    }

    #[test]
    fn test_state_errors_are_conflicts() {
        let invalid = LedgerError::InvalidState {
            action: "approve",
            status: TransactionStatus::Completed,
        };
        let violation = LedgerError::InvariantViolation("allocated below zero".to_string());

        assert_eq!(invalid.status_code(), StatusCode::CONFLICT);
        assert_eq!(violation.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            invalid.to_string(),
            "Invalid state: cannot approve a transaction in status COMPLETED"
        );
    }

    #[test]
    fn test_database_error_status_code() {
        let error = LedgerError::Database(sqlx::Error::RowNotFound);
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_validation_error_conversion() {
        let error: LedgerError = ValidationError::new("currency", "must be 3 letters").into();
        assert!(matches!(error, LedgerError::Validation(ref msg) if msg == "currency: must be 3 letters"));
    }

    #[tokio::test]
    async fn test_invalid_state_response() {
        let error = LedgerError::InvalidState {
            action: "complete",
            status: TransactionStatus::Pending,
        };
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_storage_error_response() {
        let error = LedgerError::Storage("commit failed".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
