//! zephyr-router: Zero-dependency ordered route collection
//!
//! Single Source of Truth (SSOT) matching engine used by the zephyr-core
//! dispatch orchestrator.
//!
//! ## Features
//! - First-match-wins lookup over a deterministically ordered collection
//! - Static paths: `/users`, `/api/v1/health`
//! - Parameters: `/users/:id`, `/posts/:postId/comments/:commentId`
//! - Trailing wildcards: `/files/*`, and the exact-wildcard route `*`
//! - Zero external dependencies
//!
//! ## Path Syntax
//! - `:name` - Named parameter (captures one segment)
//! - `*` - Trailing wildcard (captures the remaining path, may be empty)
//!
//! ## Ordering
//! Routes whose template contains a wildcard segment sort after non-wildcard
//! routes; the exact-wildcard route `*` sorts last of all; within each rank
//! routes sort lexicographically by raw template. Lookup walks the collection
//! in that order and returns the first route whose pattern accepts the path
//! or the path with one trailing slash appended.
//!
//! ## Example
//! ```
//! use zephyr_router::{Method, Route, RouteCollection};
//!
//! let mut routes = RouteCollection::new();
//! routes.insert(Route::new(Method::Get, "/users/:id", 1));
//! routes.insert(Route::new(Method::Get, "/files/*", 2));
//!
//! let hit = routes.find(Method::Get, "/users/42").unwrap();
//! assert_eq!(*hit.route.value(), 1);
//! assert_eq!(hit.params, vec![("id".to_string(), "42".to_string())]);
//! ```

use std::collections::HashMap;

/// HTTP methods accepted by the registration API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    /// Parse from string (case-insensitive). `None` for unsupported methods.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            "OPTIONS" => Some(Method::Options),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One compiled path segment
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Literal segment, matched case-sensitively
    Literal(String),
    /// `:name` - captures exactly one segment
    Param(String),
    /// Trailing `*` - captures the remaining path
    Wildcard,
}

/// Compiled matcher for one route template
///
/// Compiled once at registration time, immutable thereafter. A pattern
/// remembers whether its template carried a trailing slash; matching is
/// exact on that flag, so lookup retries with an appended slash (§ trailing
/// slash tolerance) rather than the pattern silently ignoring it.
#[derive(Debug, Clone)]
pub struct PathPattern {
    segments: Vec<Segment>,
    /// Template ended with `/` (and was longer than just `/`)
    trailing_slash: bool,
    /// Ordered parameter names extracted at compile time
    param_names: Vec<String>,
}

impl PathPattern {
    /// Compile a template into a matcher
    pub fn compile(template: &str) -> Self {
        let trailing_slash = template.len() > 1 && template.ends_with('/');
        let mut segments = Vec::new();
        let mut param_names = Vec::new();

        for raw in template.split('/').filter(|s| !s.is_empty()) {
            if let Some(name) = raw.strip_prefix(':') {
                param_names.push(name.to_string());
                segments.push(Segment::Param(name.to_string()));
            } else if raw == "*" {
                // Wildcard only ever terminates a template
                segments.push(Segment::Wildcard);
                break;
            } else {
                segments.push(Segment::Literal(raw.to_string()));
            }
        }

        Self {
            segments,
            trailing_slash,
            param_names,
        }
    }

    /// Whether any segment is a wildcard
    pub fn has_wildcard(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Wildcard))
    }

    /// Whether this is the exact-wildcard pattern (`*`), which accepts
    /// every path and sorts last of all
    pub fn is_catch_all(&self) -> bool {
        self.segments.len() == 1 && self.segments[0] == Segment::Wildcard
    }

    /// Ordered parameter names
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Match a concrete path, capturing named parameters in order.
    ///
    /// Returns `None` on mismatch. The wildcard capture is recorded under
    /// the name `*` and may be empty.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let path_trailing = path.len() > 1 && path.ends_with('/');
        if path_trailing != self.trailing_slash && !self.has_wildcard() {
            return None;
        }

        let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = Vec::new();
        let mut idx = 0;

        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => {
                    if segs.get(idx) != Some(&lit.as_str()) {
                        return None;
                    }
                    idx += 1;
                }
                Segment::Param(name) => {
                    let value = segs.get(idx)?;
                    params.push((name.clone(), (*value).to_string()));
                    idx += 1;
                }
                Segment::Wildcard => {
                    params.push(("*".to_string(), segs[idx..].join("/")));
                    return Some(params);
                }
            }
        }

        if idx == segs.len() {
            Some(params)
        } else {
            None
        }
    }
}

/// Module tag - names the registering module and its base path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleTag {
    pub name: String,
    pub base_path: String,
}

/// Immutable description of one registered endpoint
///
/// Created at registration time and owned exclusively by the collection.
/// `T` is the terminal payload supplied by the frontend (handler bundle,
/// handler id, etc.).
#[derive(Debug)]
pub struct Route<T> {
    method: Method,
    path: String,
    pattern: PathPattern,
    value: T,
    metadata: HashMap<String, String>,
    module: Option<ModuleTag>,
}

impl<T> Route<T> {
    /// Create a route, compiling the template
    pub fn new(method: Method, path: impl Into<String>, value: T) -> Self {
        let path = path.into();
        let pattern = PathPattern::compile(&path);
        Self {
            method,
            path,
            pattern,
            value,
            metadata: HashMap::new(),
            module: None,
        }
    }

    /// Attach arbitrary metadata (rate-limit hints and the like)
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Tag with the owning module
    pub fn with_module(mut self, name: impl Into<String>, base_path: impl Into<String>) -> Self {
        self.module = Some(ModuleTag {
            name: name.into(),
            base_path: base_path.into(),
        });
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Raw path template as registered
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn module(&self) -> Option<&ModuleTag> {
        self.module.as_ref()
    }

    /// Ordering rank: non-wildcard < wildcard < exact-wildcard
    fn rank(&self) -> u8 {
        if self.pattern.is_catch_all() {
            2
        } else if self.pattern.has_wildcard() {
            1
        } else {
            0
        }
    }
}

/// Successful lookup result
#[derive(Debug)]
pub struct Matched<'a, T> {
    /// The matched route
    pub route: &'a Route<T>,
    /// Captured path parameters as (name, value) pairs
    pub params: Vec<(String, String)>,
}

impl<T> Matched<'_, T> {
    /// Params as a map for convenient access
    pub fn params_map(&self) -> HashMap<String, String> {
        self.params.iter().cloned().collect()
    }
}

/// Ordered route collection with deterministic tie-break sorting
///
/// Insertion keeps the invariant: rank ascending (see [`Route::rank`]),
/// lexicographic by raw template within a rank, registration order for
/// identical keys. Lookup is first-match-wins under that order.
#[derive(Debug)]
pub struct RouteCollection<T> {
    routes: Vec<Route<T>>,
}

// Not derived: the payload type needs no Default of its own
impl<T> Default for RouteCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RouteCollection<T> {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Insert a route at its sorted position
    pub fn insert(&mut self, route: Route<T>) {
        let key = (route.rank(), route.path.clone());
        let pos = self
            .routes
            .iter()
            .position(|r| (r.rank(), r.path.clone()) > key)
            .unwrap_or(self.routes.len());
        self.routes.insert(pos, route);
    }

    /// Find the first route accepting `method` + `path`.
    ///
    /// Each route is tried against the raw path and, failing that, the raw
    /// path with one trailing slash appended (never stripped). Absence is
    /// `None`; the caller decides the 404.
    pub fn find(&self, method: Method, path: &str) -> Option<Matched<'_, T>> {
        let slashed = format!("{path}/");
        for route in &self.routes {
            if route.method != method {
                continue;
            }
            if let Some(params) = route
                .pattern
                .matches(path)
                .or_else(|| route.pattern.matches(&slashed))
            {
                return Some(Matched { route, params });
            }
        }
        None
    }

    /// Routes in matching order
    pub fn iter(&self) -> impl Iterator<Item = &Route<T>> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
