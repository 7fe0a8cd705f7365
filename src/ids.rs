use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

/// Longest correlation id accepted from a caller.
pub const MAX_REQUEST_ID_LEN: usize = 128;

static REQUEST_ID_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[A-Za-z0-9._:\-]{1,128}$").expect("request id pattern is valid")
});

/// Per-request correlation identifier.
///
/// Either taken verbatim from a well-formed `X-Request-ID` header or freshly
/// generated as a ULID. Cloning is an atomic increment, so the id can be
/// handed to log fields, error bodies and response headers freely.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct RequestId(Arc<str>);

/// Returned when a caller-supplied id is empty, too long or uses
/// characters outside `[A-Za-z0-9._:-]`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed request id")]
pub struct MalformedRequestId;

impl RequestId {
    pub fn new() -> Self {
        Self(Arc::from(ulid::Ulid::new().to_string()))
    }

    /// Use the header value when it is well-formed, otherwise generate a new id.
    pub fn from_header_or_new(header_value: Option<&str>) -> Self {
        header_value
            .and_then(|s| s.parse::<RequestId>().ok())
            .unwrap_or_default()
    }

    pub fn is_well_formed(candidate: &str) -> bool {
        candidate.len() <= MAX_REQUEST_ID_LEN && REQUEST_ID_RE.is_match(candidate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RequestId {
    type Err = MalformedRequestId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if Self::is_well_formed(s) {
            Ok(RequestId(Arc::from(s)))
        } else {
            Err(MalformedRequestId)
        }
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<RequestId>()
            .map_err(|_| serde::de::Error::custom("invalid request id"))
    }
}
