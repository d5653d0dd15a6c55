//! Error types for the search engine

use crate::models::DataType;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures while turning criteria into a query. Each variant names the offending
/// field so a caller can point at the single criterion to fix.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Unknown field: {uid}")]
    UnknownField { uid: String },

    #[error("Field {uid} is not available to this user")]
    ForbiddenField { uid: String },

    #[error("Operator '{operator}' is not valid for {data_type} field {uid}")]
    InvalidOperator {
        uid: String,
        operator: String,
        data_type: DataType,
    },

    #[error("Invalid value '{value}' for field {uid} ({operator}): {reason}")]
    InvalidValue {
        uid: String,
        operator: String,
        value: String,
        reason: String,
    },

    #[error("Module {module} requires at least one search criterion")]
    MissingCriterion { module: String },
}

impl CompileError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownField { .. } => "unknown_field",
            Self::ForbiddenField { .. } => "forbidden_field",
            Self::InvalidOperator { .. } => "invalid_operator",
            Self::InvalidValue { .. } => "invalid_value",
            Self::MissingCriterion { .. } => "missing_criterion",
        }
    }

    pub fn field_uid(&self) -> Option<&str> {
        match self {
            Self::UnknownField { uid }
            | Self::ForbiddenField { uid }
            | Self::InvalidOperator { uid, .. }
            | Self::InvalidValue { uid, .. } => Some(uid.as_str()),
            Self::MissingCriterion { .. } => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Result cache warm-up failed: {0}")]
    CacheWarmupFailure(String),

    #[error("Schedule delivery failed: {0}")]
    ScheduleDeliveryFailure(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Execution-time failures worth retrying for interactive callers.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(e) => !matches!(e, sqlx::Error::RowNotFound),
            Error::Timeout(_) => true,
            _ => false,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Error::Compile(e) => e.code(),
            Error::NotFound(_) => "not_found",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::Validation(_) => "validation",
            Error::Conflict(_) => "conflict",
            Error::CacheWarmupFailure(_) => "cache_warmup_failure",
            Error::ScheduleDeliveryFailure(_) => "schedule_delivery_failure",
            Error::Timeout(_) => "timeout",
            Error::Database(_) | Error::Internal(_) | Error::Other(_) => "internal",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::Compile(_) | Error::Validation(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            Error::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Error::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            Error::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            Error::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            Error::CacheWarmupFailure(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            Error::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            Error::ScheduleDeliveryFailure(_)
            | Error::Database(_)
            | Error::Internal(_)
            | Error::Other(_) => {
                tracing::error!("Internal error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let field_uid = match &self {
            Error::Compile(e) => e.field_uid().map(str::to_string),
            _ => None,
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
                "field_uid": field_uid,
            }
        }));

        (status, body).into_response()
    }
}
