#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use genai_api::app::{build_dispatcher, AppDispatcher, AppState, Settings, StaticSettings, Tier, User, UserStore};
use genai_api::config::AppConfig;
use genai_api::dispatcher::{HandlerResponse, IncomingRequest};
use http::Method;
use serde_json::{json, Value};

pub const FREE_KEY: &str = "key-123";
pub const PRO_KEY: &str = "key-456";
pub const ADMIN_KEY: &str = "admin-123";

/// Seeded state with default settings.
pub fn state() -> Arc<AppState> {
    Arc::new(AppState::with_defaults().unwrap())
}

pub fn state_with_settings(settings: Settings) -> AppState {
    AppState::new(Box::new(StaticSettings(settings))).unwrap()
}

/// Dispatcher with every route and the default middleware stack.
pub fn dispatcher(state: Arc<AppState>) -> AppDispatcher {
    build_dispatcher(state, &AppConfig::default()).unwrap()
}

pub fn user(id: u64, tier: Tier, tokens_used: u64, token_limit: u64) -> User {
    User {
        id,
        email: format!("user{id}@example.com"),
        tier,
        tokens_used,
        token_limit,
    }
}

/// Replace the seeded users with `users`, keyed by API key.
pub fn with_users(mut state: AppState, users: Vec<(&str, User)>) -> AppState {
    state.users = UserStore::new(users.into_iter().map(|(k, u)| (k.to_string(), u)));
    state
}

pub fn get(path: &str, api_key: Option<&str>) -> IncomingRequest {
    let req = IncomingRequest::new(Method::GET, path);
    match api_key {
        Some(key) => req.header("x-api-key", key),
        None => req,
    }
}

pub fn post(path: &str, api_key: Option<&str>, body: &Value) -> IncomingRequest {
    let req = IncomingRequest::new(Method::POST, path).json(body);
    match api_key {
        Some(key) => req.header("x-api-key", key),
        None => req,
    }
}

pub fn delete(path: &str, api_key: &str) -> IncomingRequest {
    IncomingRequest::new(Method::DELETE, path).header("x-api-key", api_key)
}

pub fn chat_body(model: Option<&str>, content: &str, max_tokens: u32) -> Value {
    let mut body = json!({
        "messages": [{"role": "user", "content": content}],
        "max_tokens": max_tokens,
    });
    if let Some(model) = model {
        body["model"] = json!(model);
    }
    body
}

pub fn header<'a>(resp: &'a HandlerResponse, name: &str) -> Option<&'a str> {
    resp.get_header(name)
}

/// Send a raw HTTP/1.1 request and return the full response text.
pub fn send_request(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(raw.as_bytes()).unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

/// Split a raw response into status, lower-cased headers and body.
pub fn parse_response(raw: &str) -> (u16, Vec<(String, String)>, String) {
    let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
    let mut lines = head.lines();
    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    (status, headers, body.to_string())
}
