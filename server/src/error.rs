//! Unified error handling for the server.

use crate::retry;
use asof_engine::{Error as EngineError, StoreErrorKind};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Database(e) => match retry::classify(e) {
                StoreErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
                StoreErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Engine(e) => engine_status(e),
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

fn engine_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::OldVersionInsertion { .. } | EngineError::EntityAlreadyExists(_) => {
            StatusCode::CONFLICT
        }
        EngineError::EntityNotFound(_) | EngineError::EntityTypeNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        EngineError::VersionTypeMismatch { .. }
        | EngineError::UnknownField(_)
        | EngineError::TypeMismatch { .. }
        | EngineError::MissingRequiredField(_)
        | EngineError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        // Stored documents and the schema are ours, not the caller's
        EngineError::InvalidDocument(_) | EngineError::InvalidSchema(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        EngineError::Store(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let (error_message, details) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                ("Database error".to_string(), None)
            }
            AppError::Engine(e) if status.is_server_error() => {
                tracing::error!("Engine error: {:?}", e);
                ("Internal server error".to_string(), Some(e.to_string()))
            }
            AppError::Engine(e) => {
                tracing::warn!("Engine error: {:?}", e);
                (e.to_string(), None)
            }
            AppError::BadRequest(msg) | AppError::NotFound(msg) => (msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use asof_engine::StoreError;

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (EngineError::old_version(&5, &3), StatusCode::CONFLICT),
            (EngineError::EntityAlreadyExists("a".into()), StatusCode::CONFLICT),
            (EngineError::EntityNotFound("a".into()), StatusCode::NOT_FOUND),
            (EngineError::EntityTypeNotFound("t".into()), StatusCode::NOT_FOUND),
            (EngineError::UnknownField("f".into()), StatusCode::BAD_REQUEST),
            (EngineError::InvalidQuery("q".into()), StatusCode::BAD_REQUEST),
            (
                EngineError::InvalidDocument("d".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                EngineError::Store(StoreError::transient("reset")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status(), expected);
        }
    }

    #[test]
    fn database_errors_follow_classification() {
        assert_eq!(
            AppError::from(sqlx::Error::PoolTimedOut).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(sqlx::Error::PoolClosed).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
