use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use super::ApiError;
use crate::dispatcher::HandlerResponse;
use crate::ids::RequestId;

/// Turns a domain failure into the response the caller sees.
///
/// Registered once on the [`Dispatcher`](crate::dispatcher::Dispatcher) and
/// invoked for every failure raised by a middleware layer, a dependency step
/// or a handler. Implementations must never place internal detail from
/// [`ApiError::Unexpected`] in the response.
pub trait ErrorTranslator: Send + Sync {
    fn translate(&self, error: &ApiError, request_id: &RequestId) -> HandlerResponse;
}

/// Default translator producing `{"error", "detail", "request_id", ...}` bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonErrorTranslator;

impl JsonErrorTranslator {
    fn advisory_fields(error: &ApiError, body: &mut Map<String, Value>) {
        match error {
            ApiError::Validation { details, .. } => {
                body.insert("details".into(), json!(details));
            }
            ApiError::QuotaExceeded {
                tokens_used,
                token_limit,
            } => {
                body.insert("tokens_used".into(), json!(tokens_used));
                body.insert("token_limit".into(), json!(token_limit));
                body.insert(
                    "remaining_tokens".into(),
                    json!(token_limit.saturating_sub(*tokens_used)),
                );
            }
            ApiError::TokenBudgetExceeded {
                requested,
                remaining,
            } => {
                body.insert("requested_tokens".into(), json!(requested));
                body.insert("remaining_tokens".into(), json!(remaining));
            }
            ApiError::ModelNotFound { available, .. } => {
                body.insert("available_models".into(), json!(available));
            }
            ApiError::Unexpected(_) => {
                body.insert(
                    "support".into(),
                    json!("Contact support and quote the request_id"),
                );
            }
            ApiError::BadRequest(_)
            | ApiError::Unauthenticated(_)
            | ApiError::Forbidden(_)
            | ApiError::NotFound(_)
            | ApiError::RateLimited { .. }
            | ApiError::Provider { .. } => {}
        }
        if let Some(secs) = error.retry_after() {
            body.insert("retry_after_seconds".into(), json!(secs));
        }
    }

    fn log(error: &ApiError, request_id: &RequestId) {
        let status = error.status().as_u16();
        match error {
            // Full chain goes to the log only
            ApiError::Unexpected(inner) => error!(
                request_id = %request_id,
                status,
                error = ?inner,
                "Unhandled failure"
            ),
            ApiError::Provider { provider, reason } => error!(
                request_id = %request_id,
                status,
                provider = %provider,
                reason = %reason,
                "Upstream provider failure"
            ),
            ApiError::TokenBudgetExceeded { .. }
            | ApiError::RateLimited { .. }
            | ApiError::QuotaExceeded { .. } => warn!(
                request_id = %request_id,
                status,
                code = error.code(),
                detail = %error,
                "Request throttled"
            ),
            ApiError::Validation { .. }
            | ApiError::BadRequest(_)
            | ApiError::Unauthenticated(_)
            | ApiError::Forbidden(_)
            | ApiError::NotFound(_)
            | ApiError::ModelNotFound { .. } => info!(
                request_id = %request_id,
                status,
                code = error.code(),
                detail = %error,
                "Request rejected"
            ),
        }
    }
}

impl ErrorTranslator for JsonErrorTranslator {
    fn translate(&self, error: &ApiError, request_id: &RequestId) -> HandlerResponse {
        Self::log(error, request_id);

        let mut body = Map::new();
        body.insert("error".into(), json!(error.code()));
        body.insert("detail".into(), json!(error.public_message()));
        body.insert("request_id".into(), json!(request_id.as_str()));
        Self::advisory_fields(error, &mut body);

        let mut response = HandlerResponse::json(error.status().as_u16(), Value::Object(body));
        if let Some(secs) = error.retry_after() {
            response.set_header("retry-after", secs.to_string());
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldError;

    fn rid() -> RequestId {
        "req-1".parse().unwrap()
    }

    #[test]
    fn test_not_found_body() {
        let resp = JsonErrorTranslator.translate(&ApiError::NotFound("Model gpt-99 not found".into()), &rid());
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body["error"], "not_found");
        assert_eq!(resp.body["detail"], "Model gpt-99 not found");
        assert_eq!(resp.body["request_id"], "req-1");
        assert!(resp.get_header("retry-after").is_none());
    }

    #[test]
    fn test_model_not_found_lists_available() {
        let err = ApiError::ModelNotFound {
            model_id: "gpt-99".into(),
            available: vec!["gpt-4".into(), "llama-3.1".into()],
        };
        let resp = JsonErrorTranslator.translate(&err, &rid());
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body["error"], "not_found");
        assert_eq!(resp.body["detail"], "Model gpt-99 not found");
        assert_eq!(resp.body["available_models"], json!(["gpt-4", "llama-3.1"]));
    }

    #[test]
    fn test_unexpected_is_generic() {
        let err = ApiError::from(anyhow::anyhow!("connection string postgres://secret"));
        let resp = JsonErrorTranslator.translate(&err, &rid());
        assert_eq!(resp.status, 500);
        assert_eq!(resp.body["error"], "internal_error");
        assert_eq!(resp.body["detail"], "An unexpected error occurred");
        assert!(!resp.body.to_string().contains("secret"));
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let err = ApiError::RateLimited {
            limit: 10,
            retry_after_secs: 60,
        };
        let resp = JsonErrorTranslator.translate(&err, &rid());
        assert_eq!(resp.status, 429);
        assert_eq!(resp.get_header("Retry-After"), Some("60"));
        assert_eq!(resp.body["retry_after_seconds"], 60);
    }

    #[test]
    fn test_token_budget_advises_an_hour() {
        let err = ApiError::TokenBudgetExceeded {
            requested: 40,
            remaining: 5,
        };
        let resp = JsonErrorTranslator.translate(&err, &rid());
        assert_eq!(resp.status, 429);
        assert_eq!(resp.get_header("retry-after"), Some("3600"));
        assert_eq!(resp.body["remaining_tokens"], 5);
    }

    #[test]
    fn test_quota_reports_remaining() {
        let err = ApiError::QuotaExceeded {
            tokens_used: 1200,
            token_limit: 1000,
        };
        let resp = JsonErrorTranslator.translate(&err, &rid());
        assert_eq!(resp.status, 403);
        assert_eq!(resp.body["remaining_tokens"], 0);
    }

    #[test]
    fn test_validation_lists_fields() {
        let err = ApiError::validation(
            "Request body failed validation",
            vec![FieldError::new("/temperature", "3.5 is greater than the maximum of 2")],
        );
        let resp = JsonErrorTranslator.translate(&err, &rid());
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["details"][0]["field"], "/temperature");
    }

    #[test]
    fn test_provider_failure_is_503() {
        let err = ApiError::Provider {
            provider: "openai".into(),
            reason: "HTTP 502 from upstream".into(),
        };
        let resp = JsonErrorTranslator.translate(&err, &rid());
        assert_eq!(resp.status, 503);
        assert_eq!(resp.get_header("retry-after"), Some("60"));
        assert!(!resp.body.to_string().contains("502"));
    }
}
