// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid or expired token")]
    InvalidToken,

    /// An unverified identity claim tried to reach an account it cannot prove it owns.
    #[error("Identity could not be verified")]
    IdentityNotVerified,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Insufficient credits")]
    InsufficientCredits,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid payment signature")]
    InvalidSignature,

    /// Retryable: the selected backend failed or timed out.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Payment verified and recorded, but the credit grant failed.
    #[error("Payment verified but credit grant failed (transaction {transaction_id}): {reason}")]
    ReconciliationPartialFailure {
        transaction_id: String,
        reason: String,
    },

    #[error("Payment provider error: {0}")]
    PaymentProvider(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StorageUnavailable(_))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => message.to_string(),
                    None => format!("{} is invalid", field),
                })
            })
            .collect();
        messages.sort();
        AppError::Validation(messages.join("; "))
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", Some(msg.clone()))
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg.clone())),
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated", None),
            AppError::InvalidToken => (StatusCode::FORBIDDEN, "invalid_token", None),
            AppError::IdentityNotVerified => {
                (StatusCode::FORBIDDEN, "identity_not_verified", None)
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::InsufficientCredits => {
                (StatusCode::FORBIDDEN, "insufficient_credits", None)
            }
            AppError::InvalidAmount(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone()))
            }
            AppError::InvalidSignature => (StatusCode::BAD_REQUEST, "invalid_signature", None),
            AppError::StorageUnavailable(msg) => {
                tracing::error!(error = %msg, "Storage unavailable");
                let body = ErrorResponse {
                    error: "storage_unavailable".to_string(),
                    details: None,
                };
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    [(header::RETRY_AFTER, "1")],
                    Json(body),
                )
                    .into_response();
            }
            AppError::ReconciliationPartialFailure {
                transaction_id,
                reason,
            } => {
                tracing::error!(
                    transaction_id = %transaction_id,
                    reason = %reason,
                    "Payment verified but credit grant failed; manual reconciliation required"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "reconciliation_partial_failure",
                    Some(format!("transaction_id={}", transaction_id)),
                )
            }
            AppError::PaymentProvider(msg) => {
                tracing::error!(error = %msg, "Payment provider error");
                (StatusCode::BAD_GATEWAY, "payment_provider_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
