use std::time::Duration;

use tracing::{error, info, warn};

use super::Middleware;
use crate::dispatcher::{HandlerRequest, HandlerResponse};

/// Logs one line when a request enters and one when its response leaves.
///
/// Both lines are emitted inside the dispatcher's `request` span, so they
/// carry the correlation id. Completion is logged at ERROR for 5xx, WARN for
/// 4xx and INFO otherwise. `latency_ms` covers this layer and everything
/// inside it; `total_ms` runs from the moment the dispatcher accepted the
/// request.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn before(
        &self,
        req: &HandlerRequest,
    ) -> Result<Option<HandlerResponse>, crate::error::ApiError> {
        info!(
            method = %req.method,
            path = %req.path,
            handler_name = req.handler_name(),
            "Request started"
        );
        Ok(None)
    }

    fn after(&self, req: &HandlerRequest, res: &mut HandlerResponse, elapsed: Duration) {
        let latency_ms = elapsed.as_secs_f64() * 1000.0;
        let total_ms = req.received_at.elapsed().as_secs_f64() * 1000.0;
        match res.status {
            500.. => error!(
                method = %req.method,
                path = %req.path,
                status = res.status,
                latency_ms,
                total_ms,
                "Request completed"
            ),
            400..=499 => warn!(
                method = %req.method,
                path = %req.path,
                status = res.status,
                latency_ms,
                total_ms,
                "Request completed"
            ),
            _ => info!(
                method = %req.method,
                path = %req.path,
                status = res.status,
                latency_ms,
                total_ms,
                "Request completed"
            ),
        }
    }
}
