use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_i18n::t;
use serde::Serialize;
use thiserror::Error;

use super::i18n::get_locale;
use crate::services::AnalysisError;
use crate::services::credential::AuthError;
use crate::services::query_executor::SqlError;

/// API Error returned by handlers
///
/// Callers only need to tell bad input (400) apart from a failed analysis (5xx); the numeric
/// code narrows the failure down for logs and support.
#[derive(Error, Debug)]
pub enum ApiError {
    // Validation errors 4xxx
    #[error("Validation error: {0}")]
    ValidationError(String),

    // System errors 5xxx
    #[error("Internal error: {0}")]
    InternalError(String),

    // Credential errors 51xx
    #[error("All authentication methods failed: {0}")]
    CredentialsExhausted(String),

    #[error("Credential resolution timed out after {secs}s")]
    CredentialTimeout { secs: u64 },

    // Database errors 52xx
    #[error("Failed to connect to database: {message}")]
    DatabaseConnectionFailed { message: String },

    #[error("Query failed: {message}")]
    QueryFailed { message: String },

    #[error("Query cancelled")]
    QueryCancelled,

    // Generic wrapper for other errors - auto-convert from anyhow::Error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// Helper to create validation error
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// Helper to create internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    pub fn error_code(&self) -> i32 {
        match self {
            Self::ValidationError(_) => 4001,

            Self::InternalError(_) | Self::Other(_) => 5001,

            Self::CredentialsExhausted(_) => 5101,
            Self::CredentialTimeout { .. } => 5102,

            Self::DatabaseConnectionFailed { .. } => 5201,
            Self::QueryFailed { .. } => 5202,
            Self::QueryCancelled => 5203,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.error_code() {
            4001..=4999 => StatusCode::BAD_REQUEST,
            5102 | 5203 => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Validation(message) => Self::ValidationError(message),
            AnalysisError::Auth(AuthError::AllMethodsExhausted { source, .. }) => {
                Self::CredentialsExhausted(source.to_string())
            },
            AnalysisError::Auth(AuthError::Timeout { budget, .. }) => {
                Self::CredentialTimeout { secs: budget.as_secs() }
            },
            AnalysisError::Sql(SqlError::ConnectionFailed { message, .. }) => {
                Self::DatabaseConnectionFailed { message }
            },
            AnalysisError::Sql(SqlError::ExecutionFailed { message, .. }) => {
                Self::QueryFailed { message }
            },
            AnalysisError::Sql(SqlError::Cancelled) => Self::QueryCancelled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Get localized error message based on current locale
    pub fn localized_message(&self) -> String {
        let locale = get_locale();
        match self {
            // surfaced verbatim
            Self::ValidationError(msg) => msg.clone(),
            Self::InternalError(msg) => {
                t!("internal.error", locale = &locale, message = msg).to_string()
            },
            Self::CredentialsExhausted(reason) => {
                t!("analysis.credentials_exhausted", locale = &locale, reason = reason).to_string()
            },
            Self::CredentialTimeout { secs } => {
                t!("analysis.credential_timeout", locale = &locale, secs = secs).to_string()
            },
            Self::DatabaseConnectionFailed { message } => {
                t!("analysis.connection_failed", locale = &locale, message = message).to_string()
            },
            Self::QueryFailed { message } => {
                t!("analysis.query_failed", locale = &locale, message = message).to_string()
            },
            Self::QueryCancelled => t!("analysis.query_cancelled", locale = &locale).to_string(),
            Self::Other(err) => {
                t!("internal.error", locale = &locale, message = err.to_string()).to_string()
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error_code();
        let status = self.status_code();
        let message = self.localized_message();

        if status.is_server_error() {
            tracing::error!("Request failed with {} ({}): {}", status, code, self);
        } else {
            tracing::warn!("Rejected request ({}): {}", code, self);
        }

        let response = ApiErrorResponse { code, message, details: None };

        (status, Json(response)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
