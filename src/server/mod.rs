//! HTTP transport.
//!
//! A pool of worker threads pulls requests off a shared `tiny_http` listener,
//! converts each into an [`IncomingRequest`](crate::dispatcher::IncomingRequest)
//! and hands it to the [`Dispatcher`](crate::dispatcher::Dispatcher). The
//! dispatcher is synchronous; concurrency exists only across requests.

mod http_server;
mod request;

pub use http_server::{HttpServer, ServerHandle};
pub use request::{read_request, write_response, ReadError, MAX_BODY_BYTES};
