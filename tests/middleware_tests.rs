mod common;

use std::sync::Arc;
use std::time::Duration;

use genai_api::deps::handler_fn;
use genai_api::dispatcher::{Dispatcher, HandlerRequest, HandlerResponse, IncomingRequest};
use genai_api::error::ApiError;
use genai_api::middleware::Middleware;
use genai_api::router::RouteMeta;
use http::Method;
use parking_lot::Mutex;
use serde_json::json;

type Log = Arc<Mutex<Vec<String>>>;

enum Outcome {
    Continue,
    Answer,
    Reject,
}

struct Recorder {
    name: &'static str,
    log: Log,
    outcome: Outcome,
}

impl Recorder {
    fn layer(name: &'static str, log: &Log, outcome: Outcome) -> Arc<dyn Middleware> {
        Arc::new(Recorder {
            name,
            log: Arc::clone(log),
            outcome,
        })
    }
}

impl Middleware for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn before(&self, _req: &HandlerRequest) -> Result<Option<HandlerResponse>, ApiError> {
        self.log.lock().push(format!("{}.before", self.name));
        match self.outcome {
            Outcome::Continue => Ok(None),
            Outcome::Answer => Ok(Some(HandlerResponse::json(200, json!({"from": self.name})))),
            Outcome::Reject => Err(ApiError::Forbidden(format!("{} says no", self.name))),
        }
    }

    fn after(&self, _req: &HandlerRequest, res: &mut HandlerResponse, _elapsed: Duration) {
        self.log.lock().push(format!("{}.after", self.name));
        res.set_header(&format!("x-seen-{}", self.name), res.status.to_string());
    }
}

struct Recorded {
    log: Log,
}

fn ping(_req: &HandlerRequest, state: &Recorded, _: ()) -> Result<HandlerResponse, ApiError> {
    state.log.lock().push("handler".to_string());
    Ok(HandlerResponse::json(200, json!({"pong": true})))
}

fn recording_dispatcher(outcomes: Vec<(&'static str, Outcome)>) -> (Dispatcher<Recorded>, Log) {
    let log: Log = Arc::default();
    let mut dispatcher = Dispatcher::new(Arc::new(Recorded {
        log: Arc::clone(&log),
    }));
    dispatcher
        .register(RouteMeta::new(Method::GET, "/ping", "ping"), handler_fn::<(), _>(ping))
        .unwrap();
    for (name, outcome) in outcomes {
        dispatcher.add_middleware(Recorder::layer(name, &log, outcome));
    }
    (dispatcher, log)
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

#[test]
fn test_after_hooks_run_in_reverse_order() {
    let (dispatcher, log) = recording_dispatcher(vec![
        ("a", Outcome::Continue),
        ("b", Outcome::Continue),
        ("c", Outcome::Continue),
    ]);

    let resp = dispatcher.dispatch(IncomingRequest::new(Method::GET, "/ping"));
    assert_eq!(resp.status, 200);
    assert_eq!(
        entries(&log),
        vec!["a.before", "b.before", "c.before", "handler", "c.after", "b.after", "a.after"]
    );
    assert_eq!(dispatcher.middleware_names(), vec!["a", "b", "c"]);
}

#[test]
fn test_short_circuit_still_unwinds_outer_layers() {
    let (dispatcher, log) = recording_dispatcher(vec![
        ("outer", Outcome::Continue),
        ("gate", Outcome::Answer),
        ("inner", Outcome::Continue),
    ]);

    let resp = dispatcher.dispatch(IncomingRequest::new(Method::GET, "/ping"));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["from"], "gate");
    assert_eq!(
        entries(&log),
        vec!["outer.before", "gate.before", "gate.after", "outer.after"]
    );
    assert_eq!(resp.get_header("x-seen-outer"), Some("200"));
    assert!(resp.get_header("x-seen-inner").is_none());
}

#[test]
fn test_rejecting_layer_response_is_translated() {
    let (dispatcher, log) = recording_dispatcher(vec![
        ("outer", Outcome::Continue),
        ("guard", Outcome::Reject),
    ]);

    let resp = dispatcher.dispatch(IncomingRequest::new(Method::GET, "/ping"));
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"], "forbidden");
    assert_eq!(resp.body["detail"], "guard says no");
    assert!(resp.body["request_id"].is_string());
    assert_eq!(
        entries(&log),
        vec!["outer.before", "guard.before", "guard.after", "outer.after"]
    );
    // Outer layers observe the translated status
    assert_eq!(resp.get_header("x-seen-outer"), Some("403"));
}

#[test]
fn test_unknown_route_passes_through_every_layer() {
    let (dispatcher, log) = recording_dispatcher(vec![("a", Outcome::Continue), ("b", Outcome::Continue)]);

    let resp = dispatcher.dispatch(IncomingRequest::new(Method::GET, "/nope"));
    assert_eq!(resp.status, 404);
    assert_eq!(resp.body["error"], "not_found");
    assert_eq!(entries(&log), vec!["a.before", "b.before", "b.after", "a.after"]);
}

#[test]
fn test_default_stack_order() {
    let dispatcher = common::dispatcher(common::state());
    assert_eq!(
        dispatcher.middleware_names(),
        vec!["cors", "request_id", "timing", "logging"]
    );
}

#[test]
fn test_default_stack_headers() {
    let dispatcher = common::dispatcher(common::state());
    let resp = dispatcher.dispatch(common::get("/health", None));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, json!({"status": "healthy"}));

    let process_time = resp.get_header("x-process-time").unwrap();
    assert!(process_time.ends_with('s'));
    assert!(process_time.trim_end_matches('s').parse::<f64>().is_ok());
    assert!(resp.get_header("x-request-id").is_some());
}
