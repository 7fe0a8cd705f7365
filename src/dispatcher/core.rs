use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use tracing::{debug, info_span, warn};

use super::request::{HandlerRequest, HandlerResponse, IncomingRequest};
use crate::deps::{ErasedHandler, Handler, Scope};
use crate::error::{ApiError, ErrorTranslator, JsonErrorTranslator};
use crate::ids::RequestId;
use crate::middleware::Middleware;
use crate::router::{RouteMeta, Router};

/// Header carrying the correlation id in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Entry point for every request.
///
/// Owns the route table, the handler table, the middleware stack and the
/// error translator, all fixed at startup. `S` is the application state
/// handed to dependency steps and handlers.
///
/// Per request, [`Dispatcher::dispatch`]:
///
/// 1. fixes the correlation id (caller's `X-Request-ID` if well-formed,
///    otherwise a new ULID) and enters a `request` span carrying it
/// 2. matches the route
/// 3. runs `before` hooks outermost first, stopping at the first
///    short-circuit
/// 4. resolves the handler's dependencies and calls it, translating any
///    failure or panic into an error response
/// 5. runs `after` hooks in reverse for every layer whose `before` ran
pub struct Dispatcher<S> {
    state: Arc<S>,
    router: Router,
    handlers: HashMap<Arc<str>, Arc<dyn ErasedHandler<S>>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    translator: Arc<dyn ErrorTranslator>,
}

impl<S: Send + Sync + 'static> Dispatcher<S> {
    #[must_use]
    pub fn new(state: Arc<S>) -> Self {
        Dispatcher {
            state,
            router: Router::default(),
            handlers: HashMap::new(),
            middlewares: Vec::new(),
            translator: Arc::new(JsonErrorTranslator),
        }
    }

    pub fn state(&self) -> &Arc<S> {
        &self.state
    }

    /// Add a route and the handler serving it.
    pub fn register<H: Handler<S>>(&mut self, route: RouteMeta, handler: H) -> anyhow::Result<()> {
        let handler_name = Arc::clone(&route.handler_name);
        self.router
            .add_route(route)
            .with_context(|| format!("invalid path pattern for handler `{handler_name}`"))?;

        if self
            .handlers
            .insert(Arc::clone(&handler_name), Arc::new(handler))
            .is_some()
        {
            warn!(
                handler_name = %handler_name,
                total_handlers = self.handlers.len(),
                "Replaced existing handler"
            );
        } else {
            debug!(
                handler_name = %handler_name,
                total_handlers = self.handlers.len(),
                "Handler registered"
            );
        }
        Ok(())
    }

    /// Append a layer. The first layer added is the outermost.
    pub fn add_middleware(&mut self, mw: Arc<dyn Middleware>) {
        self.middlewares.push(mw);
    }

    pub fn set_translator(&mut self, translator: Arc<dyn ErrorTranslator>) {
        self.translator = translator;
    }

    /// Layer names, outermost first.
    #[must_use]
    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|mw| mw.name()).collect()
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteMeta> {
        self.router.routes()
    }

    /// Dependency evaluation order for a handler, without running it.
    pub fn plan(&self, handler_name: &str) -> Option<Result<Vec<&'static str>, ApiError>> {
        self.handlers.get(handler_name).map(|h| h.plan())
    }

    pub fn dispatch(&self, incoming: IncomingRequest) -> HandlerResponse {
        let received_at = Instant::now();
        let request_id = RequestId::from_header_or_new(incoming.get_header(REQUEST_ID_HEADER));
        let (path, query_params) = incoming.split_target();

        let span = info_span!(
            "request",
            request_id = %request_id,
            method = %incoming.method,
            path = %path
        );
        let _entered = span.enter();

        let route_match = self.router.route(&incoming.method, &path);
        let (handler_name, path_params) = match route_match {
            Some(m) => (Some(Arc::clone(&m.route.handler_name)), m.path_params),
            None => (None, Default::default()),
        };

        let request = HandlerRequest {
            request_id,
            method: incoming.method,
            path,
            handler_name,
            path_params,
            query_params,
            headers: incoming.headers,
            body: incoming.body,
            received_at,
        };

        let mut entered: Vec<(&Arc<dyn Middleware>, Instant)> =
            Vec::with_capacity(self.middlewares.len());
        let mut early: Option<HandlerResponse> = None;
        for mw in &self.middlewares {
            let started = Instant::now();
            let outcome = mw.before(&request);
            entered.push((mw, started));
            match outcome {
                Ok(None) => {}
                Ok(Some(response)) => {
                    debug!(middleware = mw.name(), status = response.status, "Middleware answered early");
                    early = Some(response);
                    break;
                }
                Err(err) => {
                    debug!(middleware = mw.name(), code = err.code(), "Middleware rejected request");
                    early = Some(self.translator.translate(&err, &request.request_id));
                    break;
                }
            }
        }

        let mut response = match early {
            Some(response) => response,
            None => self.run_handler(&request),
        };

        for (mw, started) in entered.iter().rev() {
            mw.after(&request, &mut response, started.elapsed());
        }
        response
    }

    fn run_handler(&self, request: &HandlerRequest) -> HandlerResponse {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.invoke(request))).unwrap_or_else(|panic| {
            Err(ApiError::from(anyhow!(
                "handler {} panicked: {}",
                request.handler_name(),
                panic_message(&*panic)
            )))
        });

        match outcome {
            Ok(response) => response,
            Err(err) => self.translator.translate(&err, &request.request_id),
        }
    }

    fn invoke(&self, request: &HandlerRequest) -> Result<HandlerResponse, ApiError> {
        let Some(name) = request.handler_name.as_deref() else {
            return Err(ApiError::NotFound(format!(
                "No route for {} {}",
                request.method, request.path
            )));
        };
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| ApiError::from(anyhow!("handler `{name}` is routed but not registered")))?;

        debug!(handler_name = name, "Resolving dependencies");
        let scope = Scope::new(self.state.as_ref(), request);
        let response = handler.call(&scope)?;
        debug!(handler_name = name, status = response.status, "Handler complete");
        Ok(response)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
