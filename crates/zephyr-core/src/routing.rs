//! Fluent route registration frontend
//!
//! Builds [`zephyr_router::Route`]s from a chainable API with nestable
//! prefix/middleware grouping, and performs method + path lookup against
//! the ordered collection. Populated once at boot, read-only thereafter.

use crate::middleware::{Handler, Middleware};
use std::collections::HashMap;
use zephyr_router::{Matched, Method, Route, RouteCollection};

/// Terminal payload of a registered route
pub struct RouteTarget {
    /// Route-specific middleware, run after server-wide middleware
    pub middleware: Vec<Middleware>,
    pub handler: Handler,
}

/// Successful lookup against the router
pub type RouteHit<'a> = Matched<'a, RouteTarget>;

/// Options for a registration group
#[derive(Default)]
pub struct GroupOptions {
    pub prefix: Option<String>,
    pub middleware: Vec<Middleware>,
}

impl GroupOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn middleware(mut self, middleware: Vec<Middleware>) -> Self {
        self.middleware = middleware;
        self
    }
}

struct GroupFrame {
    prefix: String,
    middleware: Vec<Middleware>,
}

/// Route registration and lookup frontend
#[derive(Default)]
pub struct Router {
    routes: RouteCollection<RouteTarget>,
    groups: Vec<GroupFrame>,
    module: Option<(String, String)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag subsequently registered routes with their owning module
    pub fn set_module(
        &mut self,
        name: impl Into<String>,
        base_path: impl Into<String>,
    ) -> &mut Self {
        self.module = Some((name.into(), base_path.into()));
        self
    }

    /// Push a group frame for the duration of `body`.
    ///
    /// Nested groups chain prefixes and middleware parent-to-child; a route
    /// registered inside sees the concatenation of every enclosing frame,
    /// outer before inner.
    pub fn group(&mut self, options: GroupOptions, body: impl FnOnce(&mut Self)) -> &mut Self {
        self.groups.push(GroupFrame {
            prefix: options.prefix.unwrap_or_default(),
            middleware: options.middleware,
        });
        body(self);
        self.groups.pop();
        self
    }

    pub fn get(&mut self, path: &str, handler: Handler) -> &mut Self {
        self.route(Method::Get, path, handler, Vec::new(), HashMap::new())
    }

    pub fn post(&mut self, path: &str, handler: Handler) -> &mut Self {
        self.route(Method::Post, path, handler, Vec::new(), HashMap::new())
    }

    pub fn put(&mut self, path: &str, handler: Handler) -> &mut Self {
        self.route(Method::Put, path, handler, Vec::new(), HashMap::new())
    }

    pub fn patch(&mut self, path: &str, handler: Handler) -> &mut Self {
        self.route(Method::Patch, path, handler, Vec::new(), HashMap::new())
    }

    pub fn delete(&mut self, path: &str, handler: Handler) -> &mut Self {
        self.route(Method::Delete, path, handler, Vec::new(), HashMap::new())
    }

    pub fn options(&mut self, path: &str, handler: Handler) -> &mut Self {
        self.route(Method::Options, path, handler, Vec::new(), HashMap::new())
    }

    /// Register a route with per-route middleware and metadata
    pub fn route(
        &mut self,
        method: Method,
        path: &str,
        handler: Handler,
        middleware: Vec<Middleware>,
        metadata: HashMap<String, String>,
    ) -> &mut Self {
        let full_path = self.effective_path(path);

        // Group middleware outer-to-inner, then the route's own
        let mut combined: Vec<Middleware> = Vec::new();
        for frame in &self.groups {
            combined.extend(frame.middleware.iter().cloned());
        }
        combined.extend(middleware);

        let mut route = Route::new(
            method,
            full_path,
            RouteTarget {
                middleware: combined,
                handler,
            },
        )
        .with_metadata(metadata);

        if let Some((name, base)) = &self.module {
            route = route.with_module(name.clone(), base.clone());
        }

        self.routes.insert(route);
        self
    }

    /// Current group prefixes concatenated with the given path
    fn effective_path(&self, path: &str) -> String {
        let mut full = String::new();
        for frame in &self.groups {
            push_segment(&mut full, &frame.prefix);
        }
        push_segment(&mut full, path);
        // The route's own trailing slash survives; matching is exact on it
        if path.len() > 1 && path.ends_with('/') && !full.ends_with('/') {
            full.push('/');
        }
        if full.is_empty() {
            full.push('/');
        }
        full
    }

    /// First route (in collection order) accepting method + path.
    /// Absence is `None`; the caller decides the 404 response.
    pub fn match_route(&self, method: Method, path: &str) -> Option<RouteHit<'_>> {
        self.routes.find(method, path)
    }

    pub fn collection(&self) -> &RouteCollection<RouteTarget> {
        &self.routes
    }
}

/// Append a path part, normalizing slashes at the joint
fn push_segment(full: &mut String, part: &str) {
    let trimmed = part.trim_matches('/');
    if trimmed.is_empty() {
        return;
    }
    full.push('/');
    full.push_str(trimmed);
}
