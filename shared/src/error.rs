use lambda_http::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::identity::IdentityError;
use crate::s3::BlobError;
use crate::store::StoreError;
use crate::tokens::TokenError;

/// Error surfaced to API callers. Each variant maps to one error kind and one
/// HTTP status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    InvalidFileType(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    InvalidToken(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::InvalidFileType(_) => "invalid_file_type",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::InvalidToken(_) => "invalid_token",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) | ApiError::InvalidFileType(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) | ApiError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        }
    }

    pub fn access_denied() -> Self {
        ApiError::Forbidden("Access denied".to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound("Resource not found".to_string()),
            other => {
                tracing::error!("Document store error: {}", other);
                ApiError::Internal("Document store request failed".to_string())
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("Serialization error: {}", err);
        ApiError::Internal("Failed to encode document".to_string())
    }
}

impl From<BlobError> for ApiError {
    fn from(err: BlobError) -> Self {
        tracing::error!("Blob store error: {}", err);
        ApiError::Internal("Blob store request failed".to_string())
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(msg) => {
                tracing::error!("Failed to sign token: {}", msg);
                ApiError::Internal("Failed to generate tokens".to_string())
            }
            other => ApiError::InvalidToken(format!("Invalid token: {}", other)),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::KeyFetch(msg) => {
                tracing::error!("Failed to fetch identity provider keys: {}", msg);
                ApiError::Internal("Identity provider unavailable".to_string())
            }
            other => {
                tracing::warn!("Rejected identity assertion: {}", other);
                ApiError::InvalidToken("Invalid Google ID token".to_string())
            }
        }
    }
}
