use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use minichat_shared::MinichatError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] MinichatError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Domain(err) => {
                let status = match err {
                    MinichatError::Auth(_) => StatusCode::UNAUTHORIZED,
                    MinichatError::Permission(_) => StatusCode::FORBIDDEN,
                    MinichatError::NotFound(_) => StatusCode::NOT_FOUND,
                    MinichatError::Validation(_) | MinichatError::Call(_) => StatusCode::BAD_REQUEST,
                    MinichatError::PasswordHash(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %err, "request failed");
                    (status, "Internal server error".to_string())
                } else {
                    (status, err.to_string())
                }
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (MinichatError::unauthorized(), StatusCode::UNAUTHORIZED),
            (MinichatError::forbidden("no"), StatusCode::FORBIDDEN),
            (MinichatError::not_found("Chat"), StatusCode::NOT_FOUND),
            (MinichatError::invalid("bad"), StatusCode::BAD_REQUEST),
            (MinichatError::PasswordHash("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
