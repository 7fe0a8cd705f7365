mod builder;
mod error;

pub use builder::CorsMiddlewareBuilder;
pub use error::CorsConfigError;

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use tracing::{debug, warn};

use crate::config::Environment;
use crate::dispatcher::{HandlerRequest, HandlerResponse, HeaderVec};
use crate::error::ApiError;
use crate::middleware::Middleware;

/// Origins allowed while developing against local front-ends.
pub const DEVELOPMENT_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
];

/// Origins allowed in production.
pub const PRODUCTION_ORIGINS: &[&str] = &[
    "https://your-app.vercel.app",
    "https://your-custom-domain.com",
];

pub const ALLOWED_HEADERS: &[&str] = &["Content-Type", "Authorization", "X-API-Key", "X-Request-ID"];
pub const EXPOSED_HEADERS: &[&str] = &["X-Request-ID", "X-Process-Time", "Retry-After"];
pub const PREFLIGHT_MAX_AGE_SECS: u32 = 600;

/// CORS (Cross-Origin Resource Sharing) middleware
///
/// Handles preflight OPTIONS requests and adds CORS headers to responses.
///
/// # Security
///
/// - Validates the `Origin` header against the allow-list
/// - Rejects disallowed origins with 403 and no CORS headers
/// - Skips CORS headers for same-origin requests
/// - Supports credentials, exposed headers, and preflight caching
///
/// # Usage
///
/// ```rust,ignore
/// use genai_api::middleware::CorsMiddlewareBuilder;
/// use http::Method;
///
/// let cors = CorsMiddlewareBuilder::new()
///     .allowed_origins(&["https://example.com"])
///     .allowed_methods(&[Method::GET, Method::POST])
///     .allow_credentials(true)
///     .build()?;
/// ```
pub struct CorsMiddleware {
    pub(crate) origin_validation: OriginValidation,
    pub(crate) allowed_headers: Vec<String>,
    pub(crate) allowed_methods: Vec<Method>,
    pub(crate) allow_credentials: bool,
    pub(crate) expose_headers: Vec<String>,
    pub(crate) max_age: Option<u32>,
}

/// Origin validation strategy
#[derive(Debug, Clone)]
pub enum OriginValidation {
    /// Exact string matching
    Exact(Vec<String>),
    /// Allow all origins (never combined with credentials)
    Wildcard,
}

impl OriginValidation {
    fn is_allowed(&self, origin: &str) -> bool {
        match self {
            OriginValidation::Exact(origins) => origins.iter().any(|o| o == origin),
            OriginValidation::Wildcard => true,
        }
    }

    fn is_wildcard(&self) -> bool {
        matches!(self, OriginValidation::Wildcard)
    }
}

impl CorsMiddleware {
    /// The allow-lists used by the service for `environment`.
    pub fn for_environment(environment: Environment) -> Result<Self, CorsConfigError> {
        let origins = match environment {
            Environment::Development => DEVELOPMENT_ORIGINS,
            Environment::Production => PRODUCTION_ORIGINS,
        };
        CorsMiddlewareBuilder::new()
            .allowed_origins(origins)
            .allowed_methods(&[
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allowed_headers(ALLOWED_HEADERS)
            .expose_headers(EXPOSED_HEADERS)
            .allow_credentials(true)
            .max_age(PREFLIGHT_MAX_AGE_SECS)
            .build()
    }

    /// Returns the value for `Access-Control-Allow-Origin`, or `None` when the
    /// origin is not allowed.
    fn validate_origin(&self, origin: &str) -> Option<String> {
        if !self.origin_validation.is_allowed(origin) {
            return None;
        }
        if self.origin_validation.is_wildcard() {
            Some("*".to_string())
        } else {
            Some(origin.to_string())
        }
    }

    /// Same origin means same scheme, host and port. The server itself only
    /// speaks plain HTTP, so the request scheme is `http` unless a proxy says
    /// otherwise through `X-Forwarded-Proto`. Missing ports take the scheme's
    /// default.
    fn is_same_origin(&self, req: &HandlerRequest, origin: &str) -> bool {
        let Some(host) = req.get_header("host") else {
            return false;
        };
        let Ok(origin) = url::Url::parse(origin) else {
            return false;
        };
        let scheme = req
            .get_header("x-forwarded-proto")
            .map(str::trim)
            .unwrap_or("http");
        let Ok(target) = url::Url::parse(&format!("{scheme}://{}", host.trim())) else {
            return false;
        };

        origin.scheme().eq_ignore_ascii_case(target.scheme())
            && origin.host_str().is_some()
            && origin.host_str() == target.host_str()
            && origin.port_or_known_default() == target.port_or_known_default()
    }

    fn joined_methods(&self) -> String {
        self.allowed_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn handle_preflight(&self, req: &HandlerRequest, origin: String) -> Result<HandlerResponse, ApiError> {
        let rejected = || ApiError::Forbidden("CORS preflight rejected".to_string());

        let requested_method = req
            .get_header("access-control-request-method")
            .ok_or_else(rejected)?;
        let requested_method = requested_method.parse::<Method>().map_err(|_| {
            warn!(requested_method, "CORS preflight: invalid Access-Control-Request-Method");
            rejected()
        })?;
        if !self.allowed_methods.contains(&requested_method) {
            warn!(method = requested_method.as_str(), "CORS preflight: method not allowed");
            return Err(rejected());
        }

        if let Some(headers_str) = req.get_header("access-control-request-headers") {
            let allow_all = self.allowed_headers.iter().any(|h| h == "*");
            for header in headers_str.split(',').map(str::trim).filter(|h| !h.is_empty()) {
                if !allow_all && !self.allowed_headers.iter().any(|h| h.eq_ignore_ascii_case(header)) {
                    warn!(header, "CORS preflight: header not allowed");
                    return Err(rejected());
                }
            }
        }

        let mut headers = HeaderVec::new();
        headers.push((Arc::from("access-control-allow-origin"), origin));
        headers.push((Arc::from("access-control-allow-methods"), self.joined_methods()));
        headers.push((
            Arc::from("access-control-allow-headers"),
            self.allowed_headers.join(", "),
        ));
        if self.allow_credentials {
            headers.push((Arc::from("access-control-allow-credentials"), "true".to_string()));
        }
        if let Some(age) = self.max_age {
            headers.push((Arc::from("access-control-max-age"), age.to_string()));
        }
        headers.push((Arc::from("vary"), "Origin".to_string()));

        Ok(HandlerResponse::new(200, headers, serde_json::Value::Null))
    }
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn before(&self, req: &HandlerRequest) -> Result<Option<HandlerResponse>, ApiError> {
        let Some(origin) = req.get_header("origin") else {
            // Not a CORS request; a bare OPTIONS still gets an empty 200
            if req.method == Method::OPTIONS && req.handler_name.is_none() {
                return Ok(Some(HandlerResponse::empty(200)));
            }
            return Ok(None);
        };

        if self.is_same_origin(req, origin) {
            return Ok(None);
        }

        let Some(validated) = self.validate_origin(origin) else {
            warn!(origin, "CORS: origin not allowed");
            return Err(ApiError::Forbidden("Origin not allowed".to_string()));
        };

        let is_preflight = req.method == Method::OPTIONS
            && req.get_header("access-control-request-method").is_some();
        if is_preflight {
            return self.handle_preflight(req, validated).map(Some);
        }
        Ok(None)
    }

    fn after(&self, req: &HandlerRequest, res: &mut HandlerResponse, _elapsed: Duration) {
        let Some(origin) = req.get_header("origin") else {
            return;
        };
        if self.is_same_origin(req, origin) {
            debug!("CORS: same-origin request, skipping CORS headers");
            return;
        }
        // Disallowed origins were rejected in before(); they get no CORS headers
        let Some(validated) = self.validate_origin(origin) else {
            return;
        };

        res.set_header("access-control-allow-origin", validated);
        if self.allow_credentials {
            res.set_header("access-control-allow-credentials", "true".to_string());
        }
        if !self.expose_headers.is_empty() {
            res.set_header("access-control-expose-headers", self.expose_headers.join(", "));
        }
        res.set_header("vary", "Origin".to_string());
    }
}
