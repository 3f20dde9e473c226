use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use safeguard_domain::SafetyError;

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Safety(#[from] SafetyError),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Safety(SafetyError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Safety(SafetyError::InvalidTransition { .. })
            | Self::Safety(SafetyError::Duplicate { .. }) => StatusCode::CONFLICT,
            Self::Safety(SafetyError::InvalidConfiguration(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Safety(SafetyError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Self::Safety(SafetyError::ExecutionFailed { .. }) => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (SafetyError::not_found("alert", "x"), StatusCode::NOT_FOUND),
            (SafetyError::duplicate("operation", "x"), StatusCode::CONFLICT),
            (
                SafetyError::InvalidConfiguration(vec!["bad".into()]),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                SafetyError::Timeout {
                    operation: "positions".into(),
                    timeout_ms: 10,
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                SafetyError::ExecutionFailed {
                    operation_id: "x".into(),
                    reason: "rejected".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
        assert_eq!(
            ApiError::BadRequest("id".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
