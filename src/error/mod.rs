//! # Failure taxonomy
//!
//! Every failure a dependency step or handler can raise is an [`ApiError`].
//! The set of kinds is closed; the [`translator`] maps each kind to a status
//! code, a stable machine-readable code and a caller-safe message.
//!
//! | kind | status | code |
//! |------|--------|------|
//! | `Validation` | 400 | `validation_error` |
//! | `BadRequest` | 400 | `bad_request` |
//! | `Unauthenticated` | 401 | `unauthenticated` |
//! | `Forbidden` | 403 | `forbidden` |
//! | `QuotaExceeded` | 403 | `quota_exceeded` |
//! | `NotFound` | 404 | `not_found` |
//! | `ModelNotFound` | 404 | `not_found` |
//! | `TokenBudgetExceeded` | 429 | `token_budget_exceeded` |
//! | `RateLimited` | 429 | `rate_limit_exceeded` |
//! | `Provider` | 503 | `service_unavailable` |
//! | `Unexpected` | 500 | `internal_error` |

pub mod translator;

pub use translator::{ErrorTranslator, JsonErrorTranslator};

use http::StatusCode;
use serde::Serialize;

/// Seconds a client should wait after exhausting its token budget.
pub const TOKEN_BUDGET_RETRY_AFTER_SECS: u64 = 3600;
/// Seconds a client should wait after an upstream provider failure.
pub const PROVIDER_RETRY_AFTER_SECS: u64 = 60;

/// One offending field in a rejected request body or query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// JSON pointer or parameter name, e.g. `/messages/0/role` or `limit`
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Domain failure raised by a dependency step, a middleware layer or a handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<FieldError>,
    },

    /// Bad input that is not a schema violation, such as a duplicate identifier.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Token limit exceeded")]
    QuotaExceeded { tokens_used: u64, token_limit: u64 },

    #[error("{0}")]
    NotFound(String),

    /// A model id that is not registered. `available` lists the ids that are.
    #[error("Model {model_id} not found")]
    ModelNotFound {
        model_id: String,
        available: Vec<String>,
    },

    #[error("Token budget exceeded: {requested} tokens requested, {remaining} remaining")]
    TokenBudgetExceeded { requested: u64, remaining: u64 },

    #[error("Rate limit exceeded: {limit} requests per minute")]
    RateLimited { limit: u32, retry_after_secs: u64 },

    /// The upstream model provider failed. `reason` is logged, never returned.
    #[error("provider {provider} failed: {reason}")]
    Provider { provider: String, reason: String },

    /// Anything unclassified. The wrapped error is logged, never returned.
    #[error("unexpected failure: {0:#}")]
    Unexpected(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Unexpected(err)
    }
}

impl ApiError {
    pub fn validation(message: impl Into<String>, details: Vec<FieldError>) -> Self {
        ApiError::Validation {
            message: message.into(),
            details,
        }
    }

    /// Single-field validation failure.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let detail = FieldError::new(field, message);
        ApiError::Validation {
            message: format!("Invalid value for '{}'", detail.field),
            details: vec![detail],
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) | ApiError::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) | ApiError::ModelNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::TokenBudgetExceeded { .. } | ApiError::RateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Provider { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code placed in the `error` field of the body.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "validation_error",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthenticated(_) => "unauthenticated",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::QuotaExceeded { .. } => "quota_exceeded",
            ApiError::NotFound(_) | ApiError::ModelNotFound { .. } => "not_found",
            ApiError::TokenBudgetExceeded { .. } => "token_budget_exceeded",
            ApiError::RateLimited { .. } => "rate_limit_exceeded",
            ApiError::Provider { .. } => "service_unavailable",
            ApiError::Unexpected(_) => "internal_error",
        }
    }

    /// Message safe to show the caller.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Provider { .. } => "External service is temporarily unavailable".to_string(),
            ApiError::Unexpected(_) => "An unexpected error occurred".to_string(),
            other => other.to_string(),
        }
    }

    /// Value for the `Retry-After` header, if this kind carries one.
    #[must_use]
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ApiError::TokenBudgetExceeded { .. } => Some(TOKEN_BUDGET_RETRY_AFTER_SECS),
            ApiError::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            ApiError::Provider { .. } => Some(PROVIDER_RETRY_AFTER_SECS),
            _ => None,
        }
    }
}
