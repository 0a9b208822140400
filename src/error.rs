//! 统一的 API 错误类型与转换。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::io::ErrorKind;

use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    InvalidPath,
    NotFound(String),
    QuotaExceeded,
    Internal(String),
}

impl ApiError {
    /// 客户端据此映射提示文案的稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::InvalidPath => "invalid_path",
            ApiError::NotFound(_) => "not_found",
            ApiError::QuotaExceeded => "quota_exceeded",
            ApiError::Internal(_) => "io_failure",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::InvalidPath => (StatusCode::BAD_REQUEST, "invalid file name".to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::QuotaExceeded => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "upload exceeds the size limit".to_string(),
            ),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        let body = json!({ "code": self.code(), "message": message });
        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath => ApiError::InvalidPath,
            StorageError::QuotaExceeded => ApiError::QuotaExceeded,
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound(err.to_string()),
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}
