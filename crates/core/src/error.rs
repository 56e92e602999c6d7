//! Error type shared by every crate in the workspace.
//!
//! Errors carry a coarse [`ErrorKind`] that drives both the HTTP status at the
//! API boundary and the retryable/non-retryable classification used by the
//! event consumer. The decision engine never lets these escape to a caller:
//! it converts every failure into a denied response.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Entity missing (HTTP 404).
    NotFound,
    /// Unique-constraint violation at the entity level (HTTP 409).
    Duplicate,
    /// Malformed input (HTTP 400).
    Validation,
    /// Violated business invariant, e.g. system-role mutation (HTTP 400).
    BusinessRule,
    /// Cross-tenant boundary violation (HTTP 403).
    TenantIsolation,
    /// Transient store/broker failure, safe to retry (HTTP 503).
    TransientStore,
    /// Everything else (HTTP 500).
    Internal,
}

impl ErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Duplicate => 409,
            ErrorKind::Validation | ErrorKind::BusinessRule => 400,
            ErrorKind::TenantIsolation => 403,
            ErrorKind::TransientStore => 503,
            ErrorKind::Internal => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientStore)
    }
}

#[derive(Debug, Clone, ThisError)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn business_rule(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BusinessRule, message)
    }

    pub fn tenant_isolation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TenantIsolation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientStore, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::not_found("Entity not found"),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // 23505 = unique_violation; surfaced as a Duplicate so callers
                // can absorb idempotent re-creation.
                Some("23505") => {
                    Error::duplicate(format!("Unique constraint violation: {}", db.message()))
                }
                // Serialization failure / deadlock: safe to retry.
                Some("40001") | Some("40P01") => {
                    Error::transient(format!("Transaction conflict: {}", db.message()))
                }
                _ => Error::internal(format!("Database error: {}", db.message())),
            },
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Error::transient(format!("Database unavailable: {err}")),
            _ => Error::internal(format!("Database error: {err}")),
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::transient(format!("Redis error: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::internal(format!("Serialization error: {err}"))
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use axum::Json;
        use serde_json::json;

        let status = StatusCode::from_u16(self.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Internal details stay in the logs.
        let message = match self.kind {
            ErrorKind::Internal => "Internal server error".to_string(),
            ErrorKind::TransientStore => "Service temporarily unavailable".to_string(),
            _ => self.message.clone(),
        };

        let body = Json(json!({
            "error": {
                "kind": self.kind,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_to_http_status() {
        assert_eq!(Error::not_found("x").http_status(), 404);
        assert_eq!(Error::duplicate("x").http_status(), 409);
        assert_eq!(Error::validation("x").http_status(), 400);
        assert_eq!(Error::business_rule("x").http_status(), 400);
        assert_eq!(Error::tenant_isolation("x").http_status(), 403);
        assert_eq!(Error::transient("x").http_status(), 503);
        assert_eq!(Error::internal("x").http_status(), 500);
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(Error::transient("x").is_retryable());
        assert!(!Error::not_found("x").is_retryable());
        assert!(!Error::internal("x").is_retryable());
        assert!(!Error::business_rule("x").is_retryable());
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
