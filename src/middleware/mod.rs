//! # Middleware Module
//!
//! Cross-cutting layers wrapped around every handler.
//!
//! ## Stack order
//!
//! Layers are registered outermost first. The default stack is:
//!
//! | Layer | `before` | `after` |
//! |-------|----------|---------|
//! | [`CorsMiddleware`] | rejects unknown origins, answers preflights | adds `Access-Control-*` headers |
//! | [`RequestIdMiddleware`] | - | echoes `X-Request-ID` |
//! | [`TimingMiddleware`] | - | sets `X-Process-Time`, warns on slow requests |
//! | [`LoggingMiddleware`] | logs the request line | logs status and latency |
//!
//! `before` hooks run top to bottom and `after` hooks bottom to top, so the
//! logging layer records the final status before timing and request id
//! headers are attached, and CORS decorates the response last.

mod core;
mod cors;
mod logging;
mod request_id;
mod timing;

pub use core::Middleware;
pub use cors::{
    CorsConfigError, CorsMiddleware, CorsMiddlewareBuilder, OriginValidation, ALLOWED_HEADERS,
    DEVELOPMENT_ORIGINS, EXPOSED_HEADERS, PREFLIGHT_MAX_AGE_SECS, PRODUCTION_ORIGINS,
};
pub use logging::LoggingMiddleware;
pub use request_id::RequestIdMiddleware;
pub use timing::{TimingMiddleware, DEFAULT_SLOW_REQUEST_THRESHOLD, PROCESS_TIME_HEADER};
