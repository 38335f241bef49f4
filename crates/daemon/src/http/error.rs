//! HTTP-facing errors.
//!
//! Every collaborator error is mapped to a status code here, and the body is
//! always an [`ErrorBody`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use protocol::{ErrorBody, ProtocolError};
use thiserror::Error;

use crate::files::{IndexError, SandboxError, SettingsError, VersionError};

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request is malformed or names something it may not touch.
    #[error("{0}")]
    BadRequest(String),

    /// The named file, directory, workspace or version does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The destination already exists.
    #[error("{0}")]
    Conflict(String),

    /// A required field is missing.
    #[error("{0}")]
    Unprocessable(String),

    /// Anything the client cannot fix.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Map error variant to its HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        ApiError::Internal(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

impl From<SandboxError> for ApiError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::OutsideRoot(_)
            | SandboxError::RootNotAllowed
            | SandboxError::InvalidName(_) => ApiError::BadRequest(err.to_string()),
            SandboxError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            SandboxError::AlreadyExists(_) => ApiError::Conflict(err.to_string()),
            SandboxError::Version(e) => e.into(),
            SandboxError::Io(e) => ApiError::internal(e),
        }
    }
}

impl From<VersionError> for ApiError {
    fn from(err: VersionError) -> Self {
        match err {
            VersionError::NotFound(_) => ApiError::NotFound(err.to_string()),
            VersionError::InvalidPath(_) => ApiError::BadRequest(err.to_string()),
            VersionError::Io(e) => ApiError::internal(e),
        }
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::InvalidJson(_) => ApiError::BadRequest(err.to_string()),
            SettingsError::Corrupt { .. } | SettingsError::Io(_) => ApiError::internal(err),
        }
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::NotFound(_) => ApiError::NotFound(err.to_string()),
            IndexError::Settings(e) => e.into(),
            IndexError::Io(e) => ApiError::internal(e),
        }
    }
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_sandbox_error_mapping() {
        let cases = [
            (SandboxError::OutsideRoot("../x".into()), StatusCode::BAD_REQUEST, "Invalid path"),
            (
                SandboxError::NotFound {
                    what: "File",
                    path: "a.txt".into(),
                },
                StatusCode::NOT_FOUND,
                "File not found",
            ),
            (
                SandboxError::AlreadyExists("b".into()),
                StatusCode::CONFLICT,
                "Already exists: b",
            ),
            (
                SandboxError::Version(VersionError::NotFound("v".into())),
                StatusCode::NOT_FOUND,
                "Version not found",
            ),
        ];
        for (err, status, message) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status_code(), status);
            assert_eq!(api.to_string(), message);
        }
    }

    #[test]
    fn test_io_errors_are_internal() {
        let api: ApiError = SandboxError::Io(io::Error::other("disk on fire")).into();
        assert_eq!(api.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_invalid_settings_json_is_bad_request() {
        let err = crate::files::SettingsStore::parse("{nope").unwrap_err();
        let api: ApiError = err.into();
        assert_eq!(api.status_code(), StatusCode::BAD_REQUEST);
        assert!(api.to_string().starts_with("Invalid JSON: "));
    }

    #[test]
    fn test_unsupported_language() {
        let api: ApiError = ProtocolError::UnsupportedLanguage("ruby".into()).into();
        assert_eq!(api.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(api.to_string(), "Unsupported language");
    }

    #[tokio::test]
    async fn test_response_body_carries_detail() {
        let response = ApiError::NotFound("Workspace not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.detail, "Workspace not found");
    }
}
