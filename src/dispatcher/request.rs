use http::Method;
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ApiError, FieldError};
use crate::ids::RequestId;
use crate::router::ParamVec;

/// Maximum inline headers before heap allocation
/// Most requests have ≤16 headers
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header storage.
///
/// Names are `Arc<str>` so that the handful of names the service itself
/// writes (`content-type`, `x-request-id`, ...) clone in O(1).
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Raw request as it arrives from the transport, before a correlation id is
/// assigned or a route is matched.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: Method,
    /// Path plus optional query string, e.g. `/models?limit=2`
    pub target: String,
    pub headers: HeaderVec,
    pub body: Vec<u8>,
}

impl IncomingRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderVec::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((Arc::from(name), value.into()));
        self
    }

    /// Attach a JSON body and the matching content type.
    #[must_use]
    pub fn json(mut self, body: &Value) -> Self {
        self.body = body.to_string().into_bytes();
        self.header("content-type", "application/json")
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup (RFC 7230)
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Split the target into its path and decoded query parameters.
    pub(crate) fn split_target(&self) -> (String, ParamVec) {
        match self.target.split_once('?') {
            Some((path, query)) => (path.to_string(), parse_query_params(query)),
            None => (self.target.clone(), ParamVec::new()),
        }
    }
}

pub fn parse_query_params(query: &str) -> ParamVec {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (Arc::from(k.as_ref()), v.into_owned()))
        .collect()
}

/// Request context handed to middleware, dependency steps and handlers.
///
/// Created by the dispatcher once the correlation id is fixed and the route
/// is matched; dropped when the response has been produced.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    pub request_id: RequestId,
    pub method: Method,
    /// Request path without the query string
    pub path: String,
    /// Handler of the matched route; `None` when no route matched
    pub handler_name: Option<Arc<str>>,
    pub path_params: ParamVec,
    pub query_params: ParamVec,
    pub headers: HeaderVec,
    pub body: Vec<u8>,
    pub received_at: Instant,
}

impl HandlerRequest {
    /// Get a path parameter by name
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a query parameter by name
    ///
    /// Uses "last write wins" semantics: `?limit=10&limit=20` yields `20`.
    #[inline]
    #[must_use]
    pub fn get_query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a header by name (case-insensitive per RFC 7230)
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn handler_name(&self) -> &str {
        self.handler_name.as_deref().unwrap_or("-")
    }

    /// Path parameter that the route guarantees but which may still be absent
    /// if a handler is wired to the wrong pattern.
    pub fn require_path_param(&self, name: &str) -> Result<&str, ApiError> {
        self.get_path_param(name).ok_or_else(|| {
            ApiError::from(anyhow::anyhow!(
                "route {} has no path parameter `{name}`",
                self.handler_name()
            ))
        })
    }

    /// Parse the body as JSON. An empty or malformed body is a validation failure.
    pub fn json_body(&self) -> Result<Value, ApiError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Err(ApiError::validation(
                "Request body is required",
                vec![FieldError::new("body", "missing")],
            ));
        }
        serde_json::from_slice(&self.body).map_err(|e| {
            ApiError::validation(
                "Request body is not valid JSON",
                vec![FieldError::new("body", e.to_string())],
            )
        })
    }
}

/// Response produced by a handler, a short-circuiting layer or the error
/// translator.
///
/// A `Null` body is written as an empty payload (used for 204 and preflights).
#[derive(Debug, Clone, Serialize)]
pub struct HandlerResponse {
    pub status: u16,
    #[serde(skip_serializing)]
    pub headers: HeaderVec,
    pub body: Value,
}

impl HandlerResponse {
    #[must_use]
    pub fn new(status: u16, headers: HeaderVec, body: Value) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "application/json".to_string()));
        Self {
            status,
            headers,
            body,
        }
    }

    /// Serialize `value` into a JSON response.
    pub fn json_of<T: Serialize>(status: u16, value: &T) -> Result<Self, ApiError> {
        let body = serde_json::to_value(value)
            .map_err(|e| ApiError::from(anyhow::Error::new(e).context("serializing response")))?;
        Ok(Self::json(status, body))
    }

    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self::new(status, HeaderVec::new(), Value::Null)
    }

    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace any existing header with the same name (case-insensitive).
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    /// Body bytes as written to the wire.
    pub fn body_bytes(&self) -> Vec<u8> {
        match &self.body {
            Value::Null => Vec::new(),
            body => body.to_string().into_bytes(),
        }
    }
}
