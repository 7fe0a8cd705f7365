use http::Method;

use super::{CorsConfigError, CorsMiddleware, OriginValidation};

/// Fluent builder for [`CorsMiddleware`].
///
/// Defaults are closed: no origins, `Content-Type` and `Authorization`
/// headers, the usual CRUD methods, no credentials, no preflight caching.
///
/// ```rust,ignore
/// let cors = CorsMiddlewareBuilder::new()
///     .allowed_origins(&["https://example.com"])
///     .expose_headers(&["X-Request-ID"])
///     .max_age(600)
///     .build()?;
/// ```
pub struct CorsMiddlewareBuilder {
    allowed_origins: Vec<String>,
    allowed_headers: Vec<String>,
    allowed_methods: Vec<Method>,
    allow_credentials: bool,
    expose_headers: Vec<String>,
    max_age: Option<u32>,
}

impl CorsMiddlewareBuilder {
    pub fn new() -> Self {
        Self {
            allowed_origins: vec![],
            allowed_headers: vec!["Content-Type".into(), "Authorization".into()],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allow_credentials: false,
            expose_headers: vec![],
            max_age: None,
        }
    }

    /// Use `&["*"]` to allow every origin; incompatible with credentials.
    pub fn allowed_origins(mut self, origins: &[&str]) -> Self {
        self.allowed_origins = origins.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn allowed_methods(mut self, methods: &[Method]) -> Self {
        self.allowed_methods = methods.to_vec();
        self
    }

    /// Use `&["*"]` to allow every request header.
    pub fn allowed_headers(mut self, headers: &[&str]) -> Self {
        self.allowed_headers = headers.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// Response headers readable from browser scripts.
    pub fn expose_headers(mut self, headers: &[&str]) -> Self {
        self.expose_headers = headers.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Preflight cache duration in seconds.
    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// - [`CorsConfigError::WildcardWithCredentials`] for `*` plus credentials
    /// - [`CorsConfigError::EmptyOriginsWithCredentials`] for credentials with
    ///   no origin at all
    /// - [`CorsConfigError::InvalidOriginFormat`] for anything that is not
    ///   `scheme://host[:port]`
    pub fn build(self) -> Result<CorsMiddleware, CorsConfigError> {
        let wildcard = self.allowed_origins.iter().any(|o| o == "*");
        if self.allow_credentials && wildcard {
            return Err(CorsConfigError::WildcardWithCredentials);
        }
        if self.allow_credentials && self.allowed_origins.is_empty() {
            return Err(CorsConfigError::EmptyOriginsWithCredentials);
        }

        let origin_validation = if wildcard {
            OriginValidation::Wildcard
        } else {
            for origin in &self.allowed_origins {
                validate_origin_format(origin)?;
            }
            OriginValidation::Exact(self.allowed_origins)
        };

        Ok(CorsMiddleware {
            origin_validation,
            allowed_headers: self.allowed_headers,
            allowed_methods: self.allowed_methods,
            allow_credentials: self.allow_credentials,
            expose_headers: self.expose_headers,
            max_age: self.max_age,
        })
    }
}

impl Default for CorsMiddlewareBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An origin is a bare `scheme://host[:port]`: no path, query or fragment.
fn validate_origin_format(origin: &str) -> Result<(), CorsConfigError> {
    let invalid = || CorsConfigError::InvalidOriginFormat {
        origin: origin.to_string(),
    };
    let parsed = url::Url::parse(origin).map_err(|_| invalid())?;
    let bare = matches!(parsed.scheme(), "http" | "https")
        && parsed.host_str().is_some()
        && parsed.path() == "/"
        && !origin.ends_with('/')
        && parsed.query().is_none()
        && parsed.fragment().is_none();
    if bare {
        Ok(())
    } else {
        Err(invalid())
    }
}
