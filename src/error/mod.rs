use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the core (see SPEC_FULL.md §7).
///
/// `Database`/`Conflict` are the teacher's original split of sqlx failures;
/// `Transient` and `AuthFailed` are added so every kind spec.md §7 names is
/// representable as its own variant rather than overloaded string matching.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Database timeout or serialization failure, retried internally up to
    /// a small bound (see `db::with_retry`); surfaced only once that bound
    /// is exhausted.
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Internal server error")]
    Internal,
}

/// Map sqlx errors to AppError, with special handling for unique-constraint
/// violations (PG error code 23505) so they surface as Conflict rather than
/// Internal, and for connection/timeout errors so they surface as
/// Transient rather than a blanket Database failure.
impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                let message = match db_err.constraint() {
                    Some(c) if c.contains("email") => "Email already registered",
                    Some(c) if c.contains("pair") => "Conversation already exists",
                    Some(c) if c.contains("message_reads") => "Read record already exists",
                    _ => "Resource already exists",
                };
                AppError::Conflict(message.into())
            }
            // 40001 serialization_failure / 40P01 deadlock_detected: transaction
            // isolation conflicts under concurrent load, safe to retry.
            sqlx::Error::Database(db_err)
                if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) =>
            {
                AppError::Transient("transaction serialization conflict, retry".into())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                AppError::Transient("database unavailable, retry".into())
            }
            _ => AppError::Database(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message): (StatusCode, String) = match self {
            AppError::Database(e) => {
                tracing::error!(error = ?e, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".into())
            }
            AppError::AuthFailed(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Transient(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal => {
                tracing::error!("internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Short error kind, used by the websocket hub to frame a typed `error`
/// event without reconstructing an HTTP status code.
impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "internal",
            AppError::AuthFailed(_) => "auth_failed",
            AppError::Validation(_) => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Forbidden(_) => "forbidden",
            AppError::Transient(_) => "transient",
            AppError::Internal => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn auth_failed_returns_401() {
        let response = AppError::AuthFailed("unauthorized".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn validation_error_returns_400() {
        let response = AppError::Validation("invalid input".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn not_found_error_returns_404() {
        let response = AppError::NotFound("message not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn conflict_error_returns_409() {
        let response = AppError::Conflict("already exists".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn transient_error_returns_503() {
        let response = AppError::Transient("retry".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn internal_error_returns_500() {
        let response = AppError::Internal.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn database_row_not_found_returns_500() {
        let response = AppError::Database(sqlx::Error::RowNotFound).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn auth_failed_body_has_error_key() {
        let response = AppError::AuthFailed("unauthorized".into()).into_response();
        let json = body_json(response.into_body()).await;
        assert_eq!(json["error"], "unauthorized");
    }

    #[test]
    fn kind_is_stable_for_matching() {
        assert_eq!(AppError::Forbidden("x".into()).kind(), "forbidden");
        assert_eq!(AppError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(AppError::Transient("x".into()).kind(), "transient");
    }
}
