use http::Method;
use regex::Regex;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::debug;

/// Maximum inline path/query parameters before heap allocation
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated parameter storage for the request path.
///
/// Names are `Arc<str>` because they come from the route table and are
/// shared by every match on that route.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// A registered route: method, path pattern with `{param}` segments and the
/// name of the handler that serves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMeta {
    pub method: Method,
    pub path_pattern: Arc<str>,
    pub handler_name: Arc<str>,
}

impl RouteMeta {
    pub fn new(method: Method, path_pattern: &str, handler_name: &str) -> Self {
        Self {
            method,
            path_pattern: Arc::from(path_pattern),
            handler_name: Arc::from(handler_name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<RouteMeta>,
    pub path_params: ParamVec,
}

impl RouteMatch {
    /// Last occurrence wins when a pattern repeats a parameter name.
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

struct CompiledRoute {
    regex: Regex,
    meta: Arc<RouteMeta>,
    param_names: Vec<Arc<str>>,
}

/// Method + path matcher.
///
/// Patterns are compiled to anchored regexes once, at registration time.
/// Routes are kept longest-pattern-first so literal paths win over
/// parameterised siblings of the same prefix.
#[derive(Default)]
pub struct Router {
    routes: Vec<CompiledRoute>,
}

impl Router {
    pub fn new(routes: Vec<RouteMeta>) -> Result<Self, regex::Error> {
        let mut router = Self::default();
        for route in routes {
            router.add_route(route)?;
        }
        Ok(router)
    }

    pub fn add_route(&mut self, route: RouteMeta) -> Result<(), regex::Error> {
        let (regex, param_names) = Self::path_to_regex(&route.path_pattern)?;
        debug!(
            method = %route.method,
            path = %route.path_pattern,
            handler_name = %route.handler_name,
            "Route registered"
        );
        self.routes.push(CompiledRoute {
            regex,
            meta: Arc::new(route),
            param_names,
        });
        self.routes
            .sort_by(|a, b| b.meta.path_pattern.len().cmp(&a.meta.path_pattern.len()));
        Ok(())
    }

    #[must_use]
    pub fn route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        for compiled in &self.routes {
            if compiled.meta.method != *method {
                continue;
            }
            if let Some(captures) = compiled.regex.captures(path) {
                let mut path_params = ParamVec::new();
                for (i, name) in compiled.param_names.iter().enumerate() {
                    if let Some(val) = captures.get(i + 1) {
                        path_params.push((Arc::clone(name), val.as_str().to_string()));
                    }
                }
                return Some(RouteMatch {
                    route: Arc::clone(&compiled.meta),
                    path_params,
                });
            }
        }
        None
    }

    /// All registered routes, longest pattern first.
    pub fn routes(&self) -> impl Iterator<Item = &RouteMeta> {
        self.routes.iter().map(|r| r.meta.as_ref())
    }

    pub(crate) fn path_to_regex(path: &str) -> Result<(Regex, Vec<Arc<str>>), regex::Error> {
        if path == "/" {
            return Ok((Regex::new(r"^/$")?, Vec::new()));
        }

        let mut pattern = String::with_capacity(path.len() + 5);
        pattern.push('^');
        let mut param_names = Vec::with_capacity(path.matches('{').count());

        for segment in path.split('/') {
            if segment.starts_with('{') && segment.ends_with('}') {
                let param_name = segment.trim_start_matches('{').trim_end_matches('}');
                pattern.push_str("/([^/]+)");
                param_names.push(Arc::from(param_name));
            } else if !segment.is_empty() {
                pattern.push('/');
                pattern.push_str(&regex::escape(segment));
            }
        }

        pattern.push_str("/?$");
        Ok((Regex::new(&pattern)?, param_names))
    }
}
