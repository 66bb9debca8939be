use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use sqlx::error::ErrorKind;
use thiserror::Error as ThisError;
use tracing::error;

/// Errors raised by the database layer.
///
/// The session wrapper hands these back exactly as the backend produced them;
/// it never re-wraps a failure after retries are exhausted.
#[derive(Debug, ThisError)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] SqlxError),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("query for {entity} returned no rows")]
    NoRows { entity: &'static str },

    #[error("query for {entity} returned more than one row")]
    MultipleRows { entity: &'static str },

    #[error("{entity} has no primary key yet; flush or commit it first")]
    Unpersisted { entity: &'static str },

    #[error("failed to decode column `{column}`: {reason}")]
    Decode { column: String, reason: String },
}

/// Classification hook shared by everything that retries.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl DbError {
    /// Errors that must never be retried no matter what their message says.
    pub fn is_permanent(&self) -> bool {
        match self {
            DbError::Sqlx(SqlxError::Database(db)) => {
                matches!(
                    db.kind(),
                    ErrorKind::UniqueViolation
                        | ErrorKind::ForeignKeyViolation
                        | ErrorKind::NotNullViolation
                        | ErrorKind::CheckViolation
                ) || db.code().is_some_and(|code| code.starts_with("23"))
            }
            // A closed pool never reopens.
            DbError::Sqlx(SqlxError::RowNotFound | SqlxError::PoolClosed) => true,
            DbError::Sqlx(_) => false,
            DbError::NotFound { .. }
            | DbError::NoRows { .. }
            | DbError::MultipleRows { .. }
            | DbError::Unpersisted { .. }
            | DbError::Decode { .. } => true,
        }
    }
}

impl IsRetryable for DbError {
    /// First-class classification only: driver error classes and SQLSTATE
    /// codes that denote a lost or unusable connection.
    fn is_retryable(&self) -> bool {
        let DbError::Sqlx(err) = self else {
            return false;
        };
        match err {
            SqlxError::Io(_)
            | SqlxError::Tls(_)
            | SqlxError::Protocol(_)
            | SqlxError::PoolTimedOut
            | SqlxError::WorkerCrashed => true,
            SqlxError::Database(db) => db.code().is_some_and(|code| {
                code.starts_with("08") || matches!(code.as_ref(), "57P01" | "57P02" | "57P03")
            }),
            _ => false,
        }
    }
}

#[derive(Debug, ThisError)]
pub enum CorpfrontError {
    #[error(transparent)]
    Database(#[from] DbError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Missing or invalid admin key")]
    Unauthorized,

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SqlxError> for CorpfrontError {
    fn from(e: SqlxError) -> Self {
        CorpfrontError::Database(DbError::Sqlx(e))
    }
}

impl IntoResponse for CorpfrontError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_body) = match self {
            CorpfrontError::Database(DbError::NotFound { entity, id }) => (
                StatusCode::NOT_FOUND,
                ApiErrorBody {
                    code: "NOT_FOUND".to_string(),
                    message: format!("{entity} {id} not found"),
                },
            ),
            CorpfrontError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ApiErrorBody {
                    code: "NOT_FOUND".to_string(),
                    message,
                },
            ),
            CorpfrontError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ApiErrorBody {
                    code: "BAD_REQUEST".to_string(),
                    message,
                },
            ),
            CorpfrontError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ApiErrorBody {
                    code: "UNAUTHORIZED".to_string(),
                    message: "Authentication error.".to_string(),
                },
            ),
            err @ (CorpfrontError::Database(_)
            | CorpfrontError::Config(_)
            | CorpfrontError::Io(_)) => {
                error!(error = %err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorBody {
                        code: "INTERNAL_ERROR".to_string(),
                        message: "An internal server error occurred.".to_string(),
                    },
                )
            }
        };
        (status, Json(ApiErrorResponse { error: error_body })).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}
