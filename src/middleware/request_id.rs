use std::time::Duration;

use super::Middleware;
use crate::dispatcher::{HandlerRequest, HandlerResponse, REQUEST_ID_HEADER};

/// Echoes the request's correlation id in the `X-Request-ID` response header.
///
/// The id itself is fixed by the dispatcher before any layer runs, so it is
/// present on short-circuited and error responses too.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestIdMiddleware;

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn after(&self, req: &HandlerRequest, res: &mut HandlerResponse, _elapsed: Duration) {
        res.set_header(REQUEST_ID_HEADER, req.request_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::dispatcher::IncomingRequest;
    use http::Method;
    use std::sync::Arc;

    #[test]
    fn test_supplied_id_is_echoed() {
        let mut dispatcher = Dispatcher::new(Arc::new(()));
        dispatcher.add_middleware(Arc::new(RequestIdMiddleware));
        let resp = dispatcher.dispatch(
            IncomingRequest::new(Method::GET, "/missing").header("X-Request-ID", "trace-abc.1"),
        );
        assert_eq!(resp.status, 404);
        assert_eq!(resp.get_header("x-request-id"), Some("trace-abc.1"));
    }

    #[test]
    fn test_generated_id_when_absent_or_malformed() {
        let mut dispatcher = Dispatcher::new(Arc::new(()));
        dispatcher.add_middleware(Arc::new(RequestIdMiddleware));

        let resp = dispatcher.dispatch(IncomingRequest::new(Method::GET, "/"));
        let generated = resp.get_header("x-request-id").unwrap();
        assert_eq!(generated.len(), 26);

        let resp = dispatcher.dispatch(
            IncomingRequest::new(Method::GET, "/").header("X-Request-ID", "bad id with spaces"),
        );
        assert_ne!(resp.get_header("x-request-id"), Some("bad id with spaces"));
    }
}
