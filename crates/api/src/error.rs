//! HTTP error mapping.
//!
//! Every failure leaves a handler as `{"error": <message>, "code": <CODE>}`
//! with a status derived from where it came from:
//!
//! | Source                                   | Status | Code                |
//! |------------------------------------------|--------|---------------------|
//! | unknown job id                           | 404    | `NOT_FOUND`         |
//! | invalid job parameters                   | 400    | `VALIDATION_ERROR`  |
//! | malformed body or query string           | 400    | `BAD_REQUEST`       |
//! | engine shutting down                     | 409    | `CONFLICT`          |
//! | SQLite busy/locked, pool exhausted       | 503    | `DATABASE_BUSY`     |
//! | any other database failure               | 500    | `INTERNAL_ERROR`    |

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sdjobs_core::error::CoreError;
use sdjobs_worker::EngineError;
use serde_json::json;

/// SQLite primary result codes that mean "try again later". Extended codes
/// carry the primary one in their low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Request body or query string that could not be decoded.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Core(e) => Self::Core(e),
            EngineError::Database(e) => Self::Database(e),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Core(CoreError::NotFound { entity, id }) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{entity} with id {id} not found"),
            ),
            AppError::Core(CoreError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg)
            }
            AppError::Core(CoreError::Conflict(msg)) => (StatusCode::CONFLICT, "CONFLICT", msg),
            AppError::Database(err) => classify_sqlx_error(&err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
        };

        (status, axum::Json(json!({ "error": message, "code": code }))).into_response()
    }
}

/// Map a job-store failure to a response. Contention on the SQLite file is
/// transient and reported as 503; the rest is logged and hidden.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    let busy = match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
        _ => false,
    };

    if busy {
        tracing::warn!(error = %err, "Job store busy");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "DATABASE_BUSY",
            "The job store is busy, retry shortly".to_string(),
        );
    }

    tracing::error!(error = %err, "Job store error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
