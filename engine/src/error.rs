use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing prerequisite data: {0}")]
    MissingPrerequisiteData(String),

    #[error("Risk model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("model blob is corrupt: {0}")]
    Corrupt(String),

    #[error("training failed: {0}")]
    Training(String),
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API request failed with status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("empty response from text generator")]
    EmptyResponse,

    #[error("text generator not configured: {0}")]
    NotConfigured(String),
}

impl From<bincode::Error> for ModelError {
    fn from(err: bincode::Error) -> Self {
        ModelError::Corrupt(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::MissingPrerequisiteData(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::ModelUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            _ => {
                tracing::error!("Internal server error: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

// Helper for records that must exist before any assessment can run
pub fn missing(what: &str, studentid: &str) -> AppError {
    AppError::MissingPrerequisiteData(format!("{} not found for student {}", what, studentid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (missing("Progress record", "S1"), StatusCode::NOT_FOUND),
            (AppError::Unauthorized("no header".into()), StatusCode::UNAUTHORIZED),
            (AppError::Forbidden("other student".into()), StatusCode::FORBIDDEN),
            (AppError::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (AppError::ModelUnavailable("gone".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_missing_message() {
        let err = missing("Bloom assessment", "SV01");
        assert_eq!(
            err.to_string(),
            "Missing prerequisite data: Bloom assessment not found for student SV01"
        );
    }
}
