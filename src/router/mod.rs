//! # Router
//!
//! Matches an HTTP method and path against the registered route table and
//! extracts `{param}` segments. Routing happens once per request, before the
//! middleware stack runs, so every layer sees the resolved handler name; an
//! unmatched request still passes through the stack (CORS preflights need
//! that) and is answered with 404 only at the innermost step.

mod core;

pub use core::{ParamVec, RouteMatch, RouteMeta, Router, MAX_INLINE_PARAMS};
