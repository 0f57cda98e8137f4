use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tokio_postgres::error::SqlState;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// The referenced session does not exist.
    #[error("Invalid session")]
    SessionNotFound,

    /// The session is flagged expired or its deadline has passed.
    #[error("Session expired")]
    SessionExpired,

    /// An attendance record already exists for this identity in the session.
    #[error("Attendance already marked for this roll")]
    AttendanceExists,

    /// The submitting device is bound to another identity in the session.
    #[error("This device already marked attendance for roll {0}")]
    DeviceAlreadyUsed(String),

    /// The subject is owned by another instructor.
    #[error("Subject is assigned to {0}. Only that instructor can create sessions for it")]
    OwnershipViolation(String),

    /// The session belongs to another instructor.
    #[error("Unauthorized: this session belongs to {0}")]
    Unauthorized(String),

    /// The requester did not supply their own identity.
    #[error("Instructor identity must be set before opening a session")]
    MissingIdentity,

    /// Transient infrastructure failure.
    #[error("Attendance store is temporarily unavailable: {0}")]
    StoreUnavailable(String),

    /// Concurrent transactions touched the same documents. Retried by the store.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// A database error.
    #[error("Database error: {0}")]
    Database(tokio_postgres::Error),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),

    /// A rate limit exceeded error.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Whether the store's transaction primitive may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::TransactionConflict(_) | AppError::StoreUnavailable(_)
        )
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::SessionNotFound => "session_not_found",
            AppError::SessionExpired => "session_expired",
            AppError::AttendanceExists => "attendance_exists",
            AppError::DeviceAlreadyUsed(_) => "device_already_used",
            AppError::OwnershipViolation(_) => "ownership_violation",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::MissingIdentity => "missing_identity",
            AppError::StoreUnavailable(_) | AppError::TransactionConflict(_) => {
                "store_unavailable"
            }
            AppError::Validation(_) => "validation",
            AppError::RateLimitExceeded(_) => "rate_limited",
            AppError::Database(_)
            | AppError::Redis(_)
            | AppError::Io(_)
            | AppError::Internal(_) => "internal",
        }
    }
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        match e.code() {
            Some(code)
                if *code == SqlState::T_R_SERIALIZATION_FAILURE
                    || *code == SqlState::T_R_DEADLOCK_DETECTED
                    || *code == SqlState::UNIQUE_VIOLATION =>
            {
                AppError::TransactionConflict(e.to_string())
            }
            _ if e.is_closed() => AppError::StoreUnavailable(e.to_string()),
            _ => AppError::Database(e),
        }
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        match e {
            deadpool_postgres::PoolError::Backend(e) => AppError::from(e),
            other => AppError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Identity carried by a kind, echoed in the response body.
enum Detail {
    Identity(String),
    Owner(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let detail = match &self {
            AppError::DeviceAlreadyUsed(identity) => Some(Detail::Identity(identity.clone())),
            AppError::OwnershipViolation(owner) | AppError::Unauthorized(owner) => {
                Some(Detail::Owner(owner.clone()))
            }
            _ => None,
        };

        let (status, message) = match self {
            AppError::SessionNotFound => {
                tracing::debug!("Session not found");
                (StatusCode::NOT_FOUND, self.to_string())
            }

            AppError::SessionExpired => {
                tracing::debug!("Session expired");
                (StatusCode::GONE, self.to_string())
            }

            AppError::AttendanceExists | AppError::DeviceAlreadyUsed(_) => {
                tracing::warn!("Attendance rejected: {}", self);
                (StatusCode::CONFLICT, self.to_string())
            }

            AppError::OwnershipViolation(_) | AppError::Unauthorized(_) => {
                tracing::warn!("Ownership check failed: {}", self);
                (StatusCode::FORBIDDEN, self.to_string())
            }

            AppError::MissingIdentity => {
                tracing::debug!("Missing instructor identity");
                (StatusCode::BAD_REQUEST, self.to_string())
            }

            AppError::StoreUnavailable(ref msg) | AppError::TransactionConflict(ref msg) => {
                tracing::error!("Store unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Attendance store is temporarily unavailable, try again".to_string(),
                )
            }

            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }

            AppError::Io(ref e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "File system error".to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::RateLimitExceeded(ref msg) => {
                tracing::warn!("Rate limit exceeded: {}", msg);
                (StatusCode::TOO_MANY_REQUESTS, msg.clone())
            }
        };

        let body = match detail {
            Some(Detail::Identity(identity)) => sonic_rs::json!({
                "error": message,
                "kind": kind,
                "identity": identity,
            }),
            Some(Detail::Owner(owner)) => sonic_rs::json!({
                "error": message,
                "kind": kind,
                "owner": owner,
            }),
            None => sonic_rs::json!({
                "error": message,
                "kind": kind,
            }),
        };

        let body = sonic_rs::to_string(&body)
            .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}
