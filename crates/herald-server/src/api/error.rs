//! HTTP error mapping.

use axum::Json;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use crate::attachments::AttachmentError;
use crate::dispatcher::DispatchError;
use crate::ledger::LedgerError;
use crate::validation::ValidationReport;
use crate::versions::VersionStoreError;

/// Error returned by every API handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Validation failed: {0}")]
    Validation(ValidationReport),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// `{code, message, errors, missingAppKeys?}`
#[derive(Serialize)]
struct ValidationBody<'a> {
    code: &'static str,
    message: &'static str,
    #[serde(flatten)]
    report: &'a ValidationReport,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
        } else {
            tracing::debug!(error = %self, code, "Request rejected");
        }

        let body = match self {
            Self::Validation(report) => {
                let body = ValidationBody {
                    code,
                    message: "One or more validation errors occurred",
                    report: &report,
                };
                return (status, Json(body)).into_response();
            }
            // Server-side details stay in the log.
            Self::Internal(_) => json!({
                "code": code,
                "message": "Internal server error",
            }),
            Self::BadRequest(msg) | Self::NotFound(msg) | Self::Conflict(msg) => json!({
                "code": code,
                "message": msg,
            }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<ValidationReport> for ApiError {
    fn from(report: ValidationReport) -> Self {
        Self::Validation(report)
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Validation(report) => Self::Validation(report),
            DispatchError::NotFound(msg) => Self::NotFound(msg),
            DispatchError::Storage(msg) | DispatchError::Database(msg) => Self::Internal(msg),
        }
    }
}

impl From<VersionStoreError> for ApiError {
    fn from(e: VersionStoreError) -> Self {
        match e {
            VersionStoreError::Validation(report) => Self::Validation(report),
            VersionStoreError::NotFound(msg) => Self::NotFound(msg),
            VersionStoreError::Conflict(msg) => Self::Conflict(msg),
            VersionStoreError::Storage(msg) | VersionStoreError::Database(msg) => {
                Self::Internal(msg)
            }
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Validation(report) => Self::Validation(report),
            LedgerError::NotFound(msg) => Self::NotFound(msg),
            LedgerError::Storage(msg) => Self::Internal(msg),
        }
    }
}

impl From<AttachmentError> for ApiError {
    fn from(e: AttachmentError) -> Self {
        match e {
            AttachmentError::Upload(msg) => Self::BadRequest(msg),
            AttachmentError::Empty => Self::BadRequest("Uploaded file is empty".to_string()),
            AttachmentError::Io(msg) => Self::Internal(msg),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::BadRequest(e.body_text())
    }
}
