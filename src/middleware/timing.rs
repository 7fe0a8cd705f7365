use std::time::Duration;

use tracing::warn;

use super::Middleware;
use crate::dispatcher::{HandlerRequest, HandlerResponse};

pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Requests slower than this are logged at WARN.
pub const DEFAULT_SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(3);

/// Sets `X-Process-Time` to the wall-clock seconds spent inside this layer,
/// formatted with three decimals (`0.004s`).
#[derive(Debug, Clone, Copy)]
pub struct TimingMiddleware {
    slow_threshold: Duration,
}

impl TimingMiddleware {
    pub fn new(slow_threshold: Duration) -> Self {
        Self { slow_threshold }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }
}

impl Default for TimingMiddleware {
    fn default() -> Self {
        Self::new(DEFAULT_SLOW_REQUEST_THRESHOLD)
    }
}

impl Middleware for TimingMiddleware {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn after(&self, req: &HandlerRequest, res: &mut HandlerResponse, elapsed: Duration) {
        res.set_header(PROCESS_TIME_HEADER, format!("{:.3}s", elapsed.as_secs_f64()));
        if elapsed >= self.slow_threshold {
            warn!(
                method = %req.method,
                path = %req.path,
                status = res.status,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.slow_threshold.as_millis() as u64,
                "Slow request"
            );
        }
    }
}
