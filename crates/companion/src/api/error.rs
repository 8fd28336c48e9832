use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::companion::CompanionError;

/// 错误响应体
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

/// HTTP 层错误
///
/// 400/404/405 直接把信息返回给调用方；500 只返回通用提示，具体原因写入日志。
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found")]
    NotFound,
    #[error("method not allowed")]
    MethodNotSupported,
    #[error("{message}: {cause:#}")]
    Upstream {
        message: &'static str,
        cause: anyhow::Error,
    },
}

impl ApiError {
    /// 将服务层错误转换为 HTTP 错误，`message` 是 500 时返回给调用方的通用提示
    pub fn from_companion(err: CompanionError, message: &'static str) -> Self {
        match err {
            CompanionError::InvalidRequest(m) => ApiError::InvalidRequest(m.to_string()),
            other => ApiError::Upstream {
                message,
                cause: other.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotSupported => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::InvalidRequest(m) => m,
            ApiError::NotFound => "Not found".to_string(),
            ApiError::MethodNotSupported => "Method not allowed".to_string(),
            ApiError::Upstream { message, cause } => {
                error!("{}: {:#}", message, cause);
                message.to_string()
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
