use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use strata::{RawActivity, StrataError};

#[derive(Debug, Deserialize)]
pub struct ActivityBatchRequest {
    pub events: Vec<RawActivity>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub idle: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Engine error rendered as a JSON body with a matching status code
#[derive(Debug)]
pub struct ApiError(pub StrataError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            StrataError::Validation(_) | StrataError::Configuration(_) => StatusCode::BAD_REQUEST,
            StrataError::NotFound(_) => StatusCode::NOT_FOUND,
            StrataError::AlreadyExists { .. } => StatusCode::CONFLICT,
            StrataError::StoreUnavailable(_) | StrataError::DependencyUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StrataError> for ApiError {
    fn from(error: StrataError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_status_codes() {
        let bad = ApiError(StrataError::Validation("limit".into()));
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let down = ApiError(StrataError::StoreUnavailable("archival".into()));
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);

        let other = ApiError(StrataError::Serialization("x".into()));
        assert_eq!(other.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn activity_batch_parses() {
        let request: ActivityBatchRequest = serde_json::from_str(
            r#"{"events": [{"path": "/srv/a.txt", "activity": "create", "timestamp": "2026-03-01T00:00:00Z"}]}"#,
        )
        .unwrap();
        assert_eq!(request.events.len(), 1);
    }
}
