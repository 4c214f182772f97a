//! Unified error handling for Stratus Billing
//!
//! This module provides a comprehensive error type that covers all possible
//! failure scenarios in the application, with automatic HTTP response mapping.
//!
//! Payment-provider failures are deliberately NOT represented here: the
//! settlement engine converts them into invoice state (`failed` status plus a
//! `failure_reason`). Only failures that must abort the caller's operation
//! become an `AppError`.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Locking Errors ====================
    /// Another billing operation holds the customer lock. Retryable; callers
    /// should back off and try again rather than treat this as a failure.
    #[error("Customer {customer_id} is busy with another billing operation")]
    CustomerBusy { customer_id: i64 },

    // ==================== Business Logic Errors ====================
    #[error("Customer not found: {0}")]
    CustomerNotFound(i64),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    #[error("Insufficient balance: required {required_cents} cents, available {available_cents} cents")]
    InsufficientBalance {
        required_cents: i64,
        available_cents: i64,
    },

    #[error("Spending limit exceeded: limit {limit_cents} cents, requested {requested_cents} cents")]
    SpendingLimitExceeded {
        limit_cents: i64,
        requested_cents: i64,
    },

    #[error("Payment failed: {reason}")]
    PaymentFailed { reason: String, retryable: bool },

    /// A prior charge attempt requires out-of-band customer authentication
    /// (e.g. 3-D Secure). Server-initiated retries must fail fast with this
    /// error instead of silently re-charging; the caller redirects the
    /// customer to `action_url`.
    #[error("Payment requires customer authentication; complete it at the hosted payment page")]
    RequiresAuthentication { action_url: String },

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,

            // 402 Payment Required
            AppError::InsufficientBalance { .. }
            | AppError::SpendingLimitExceeded { .. }
            | AppError::PaymentFailed { .. } => StatusCode::PAYMENT_REQUIRED,

            // 404 Not Found
            AppError::CustomerNotFound(_)
            | AppError::ServiceNotFound(_)
            | AppError::InvoiceNotFound(_)
            | AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Conflict(_) | AppError::AlreadyExists(_) => StatusCode::CONFLICT,

            // 412 Precondition Failed
            AppError::RequiresAuthentication { .. } => StatusCode::PRECONDITION_FAILED,

            // 503 Service Unavailable - retryable lock contention
            AppError::CustomerBusy { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::CustomerBusy { .. } => "customer_busy",
            AppError::CustomerNotFound(_) => "customer_not_found",
            AppError::ServiceNotFound(_) => "service_not_found",
            AppError::InvoiceNotFound(_) => "invoice_not_found",
            AppError::InsufficientBalance { .. } => "insufficient_balance",
            AppError::SpendingLimitExceeded { .. } => "spending_limit_exceeded",
            AppError::PaymentFailed { .. } => "payment_failed",
            AppError::RequiresAuthentication { .. } => "requires_authentication",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::AlreadyExists(_) => "already_exists",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether a caller may safely retry the operation that produced this error
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::CustomerBusy { .. } => true,
            AppError::PaymentFailed { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let mut body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        // Surface the hosted authentication URL so the UI can redirect
        // instead of showing a generic failure.
        if let AppError::RequiresAuthentication { action_url } = self {
            body["payment_action_url"] = json!(action_url);
        }

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::CustomerNotFound(42).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::InsufficientBalance {
                required_cents: 1000,
                available_cents: 500,
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AppError::CustomerBusy { customer_id: 7 }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::RequiresAuthentication {
                action_url: "https://pay.example/auth".to_string(),
            }
            .status_code(),
            StatusCode::PRECONDITION_FAILED
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::CustomerBusy { customer_id: 1 }.error_code(),
            "customer_busy"
        );
        assert_eq!(
            AppError::SpendingLimitExceeded {
                limit_cents: 10_000,
                requested_cents: 20_000,
            }
            .error_code(),
            "spending_limit_exceeded"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(AppError::CustomerBusy { customer_id: 1 }.is_retryable());
        assert!(AppError::PaymentFailed {
            reason: "processor timeout".to_string(),
            retryable: true,
        }
        .is_retryable());
        assert!(!AppError::PaymentFailed {
            reason: "card declined".to_string(),
            retryable: false,
        }
        .is_retryable());
        assert!(!AppError::Database("boom".to_string()).is_retryable());
    }
}
