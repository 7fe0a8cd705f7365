use std::io::{self, Read};
use std::sync::Arc;

use http::Method;
use tracing::warn;

use crate::dispatcher::{HandlerResponse, IncomingRequest};

/// Largest request body accepted, in bytes.
pub const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// Failure to turn a raw request into an [`IncomingRequest`]. Answered by the
/// transport directly; the dispatcher never sees it.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("unsupported method {0}")]
    Method(String),
    #[error("request body exceeds {MAX_BODY_BYTES} bytes")]
    TooLarge,
    #[error("failed to read request body: {0}")]
    Io(#[from] io::Error),
}

impl ReadError {
    pub fn status(&self) -> u16 {
        match self {
            ReadError::Method(_) => 405,
            ReadError::TooLarge => 413,
            ReadError::Io(_) => 400,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ReadError::Method(_) => "method_not_allowed",
            ReadError::TooLarge => "payload_too_large",
            ReadError::Io(_) => "bad_request",
        }
    }

    pub fn to_response(&self) -> HandlerResponse {
        HandlerResponse::json(
            self.status(),
            serde_json::json!({"error": self.code(), "detail": self.to_string()}),
        )
    }
}

/// Copy method, target, headers and body out of a `tiny_http` request.
pub fn read_request(request: &mut tiny_http::Request) -> Result<IncomingRequest, ReadError> {
    let raw_method = request.method().as_str().to_string();
    let method = Method::from_bytes(raw_method.as_bytes()).map_err(|_| ReadError::Method(raw_method))?;

    let mut incoming = IncomingRequest::new(method, request.url());
    for header in request.headers() {
        incoming.headers.push((
            Arc::from(header.field.as_str().as_str()),
            header.value.as_str().to_string(),
        ));
    }

    if request
        .body_length()
        .is_some_and(|len| len as u64 > MAX_BODY_BYTES)
    {
        return Err(ReadError::TooLarge);
    }

    let mut body = Vec::new();
    request
        .as_reader()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)?;
    if body.len() as u64 > MAX_BODY_BYTES {
        return Err(ReadError::TooLarge);
    }
    incoming.body = body;
    Ok(incoming)
}

/// Write `response` back on `request`'s connection.
pub fn write_response(request: tiny_http::Request, response: HandlerResponse) -> io::Result<()> {
    let mut out = tiny_http::Response::from_data(response.body_bytes())
        .with_status_code(tiny_http::StatusCode(response.status));
    for (name, value) in &response.headers {
        match tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => out.add_header(header),
            Err(()) => warn!(header = %name, "Dropping header with non-ASCII content"),
        }
    }
    request.respond(out)
}
