use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    pub(crate) detail: String,
}

// Scoring and leaderboard recomputation roll back and re-raise one of these;
// cache and fanout failures are logged at their call sites and never surface
// here.
#[derive(Debug, Error)]
pub(crate) enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Transient(String),
    #[error("{0}")]
    Unexpected(String),
}

impl ServiceError {
    pub(crate) fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound(detail.into())
    }

    pub(crate) fn invalid_state(detail: impl Into<String>) -> Self {
        Self::InvalidState(detail.into())
    }

    pub(crate) fn conflict(detail: impl Into<String>) -> Self {
        Self::Conflict(detail.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidState(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict("duplicate record".to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Transient(e.to_string())
            }
            _ => Self::Unexpected(format!("db error: {e}")),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        // Internal detail stays in the logs for the 5xx classes.
        let detail = match &self {
            Self::Transient(inner) => {
                tracing::warn!("transient failure detail={inner}");
                "service temporarily unavailable, please retry".to_string()
            }
            Self::Unexpected(inner) => {
                tracing::error!("unexpected failure detail={inner}");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (self.status(), Json(ErrorBody { detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlx_pool_timeout_is_transient() {
        let err = ServiceError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, ServiceError::Transient(_)));
    }

    #[test]
    fn sqlx_io_error_is_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = ServiceError::from(sqlx::Error::Io(io));
        assert!(matches!(err, ServiceError::Transient(_)));
    }

    #[test]
    fn sqlx_row_not_found_is_unexpected() {
        // RowNotFound means a query contract was broken, not a missing domain
        // entity; domain lookups use fetch_optional and map to NotFound.
        let err = ServiceError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, ServiceError::Unexpected(_)));
    }

    #[test]
    fn http_status_mapping() {
        let cases = [
            (ServiceError::not_found("x"), StatusCode::NOT_FOUND),
            (ServiceError::invalid_state("x"), StatusCode::BAD_REQUEST),
            (ServiceError::conflict("x"), StatusCode::CONFLICT),
            (
                ServiceError::Transient("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ServiceError::Unexpected("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let resp = ServiceError::Unexpected("secret table missing".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
