//! # Dispatcher
//!
//! Turns an [`IncomingRequest`] into a [`HandlerResponse`]: assigns the
//! correlation id, matches the route, runs the middleware stack around the
//! handler and translates failures.
//!
//! ## Request lifecycle
//!
//! ```text
//! unstarted -> resolving dependencies -> handling -> responding -> done
//!                      |                                 ^
//!                      +------ first failing step -------+
//! ```
//!
//! Middleware `before` hooks run before dependency resolution and may jump
//! straight to `responding`. `after` hooks always run in reverse order of
//! the `before` hooks that executed.

mod core;
mod request;

pub use core::{Dispatcher, REQUEST_ID_HEADER};
pub use request::{
    parse_query_params, HandlerRequest, HandlerResponse, HeaderVec, IncomingRequest,
    MAX_INLINE_HEADERS,
};
