use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Wire-level error taxonomy. Every variant maps to a stable code and an
/// HTTP status; the body is always `{"code": ..., "detail": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("kubernetes error: {0}")]
    Kube(String),

    #[error("helm error: {0}")]
    Helm(String),

    #[error("operation queue for cluster is full")]
    Busy,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Provider(_) => "provider_error",
            ApiError::Kube(_) => "kube_error",
            ApiError::Helm(_) => "helm_error",
            ApiError::Busy => "busy",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Provider(_) | ApiError::Kube(_) | ApiError::Helm(_) => StatusCode::BAD_GATEWAY,
            ApiError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("internal error: {:#}", self);
        }
        let body = json!({
            "code": self.code(),
            "detail": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => ApiError::NotFound("row".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ApiError::Conflict("name already taken".to_string())
            }
            _ => ApiError::Internal(err.into()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses() {
        let cases: Vec<(ApiError, StatusCode, &str)> = vec![
            (ApiError::Validation("x".into()), StatusCode::BAD_REQUEST, "validation_error"),
            (ApiError::NotFound("cluster".into()), StatusCode::NOT_FOUND, "not_found"),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT, "conflict"),
            (ApiError::Provider("x".into()), StatusCode::BAD_GATEWAY, "provider_error"),
            (ApiError::Kube("x".into()), StatusCode::BAD_GATEWAY, "kube_error"),
            (ApiError::Helm("x".into()), StatusCode::BAD_GATEWAY, "helm_error"),
            (ApiError::Busy, StatusCode::SERVICE_UNAVAILABLE, "busy"),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status(), status);
            assert_eq!(err.code(), code);
        }
    }
}
