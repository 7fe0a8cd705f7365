//! # genai-api
//!
//! A small GenAI-style HTTP backend built around two pieces of plumbing:
//!
//! - a **request-scoped dependency resolver**: handlers declare the steps
//!   they need (authentication, body parsing, quota checks, ...) as a tuple
//!   of marker types, and each step is evaluated at most once per request,
//!   after its own prerequisites, stopping at the first failure;
//! - an **ordered middleware stack** wrapping every request, whose `before`
//!   hooks run outermost first and whose `after` hooks run in exactly the
//!   reverse order.
//!
//! ## Architecture
//!
//! - **[`dispatcher`]** - route matching, middleware execution and error
//!   translation for a single request
//! - **[`deps`]** - `Step`, `Scope` and the typed handler adapter
//! - **[`middleware`]** - CORS, request id, timing and access logging
//! - **[`error`]** - the `ApiError` taxonomy and its JSON rendering
//! - **[`router`]** - `{param}` path patterns compiled to regexes
//! - **[`app`]** - the toy GenAI endpoints and their in-memory stores
//! - **[`server`]** - the `tiny_http` transport and its worker pool
//! - **[`config`]** / **[`logging`]** - environment driven configuration and
//!   `tracing` subscriber setup
//! - **[`cli`]** - the `genai-api` binary's commands
//!
//! ## Request lifecycle
//!
//! ```text
//! tiny_http request
//!   -> read_request (body limit, method check)
//!   -> Dispatcher::dispatch
//!        request id assigned, route matched
//!        CORS.before -> RequestId.before -> Timing.before -> Logging.before
//!          -> Scope resolves the handler's steps (memoized, short-circuiting)
//!          -> handler
//!        Logging.after -> Timing.after -> RequestId.after -> CORS.after
//!   -> write_response
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use genai_api::app::{build_dispatcher, AppState};
//! use genai_api::config::AppConfig;
//! use genai_api::dispatcher::IncomingRequest;
//! use http::Method;
//!
//! # fn main() -> anyhow::Result<()> {
//! let state = Arc::new(AppState::with_defaults()?);
//! let dispatcher = build_dispatcher(state, &AppConfig::default())?;
//!
//! let response = dispatcher.dispatch(
//!     IncomingRequest::new(Method::GET, "/models").header("x-api-key", "key-123"),
//! );
//! assert_eq!(response.status, 200);
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod cli;
pub mod config;
pub mod deps;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod logging;
pub mod middleware;
pub mod router;
pub mod server;

pub use dispatcher::{Dispatcher, HandlerRequest, HandlerResponse, IncomingRequest};
pub use error::ApiError;
