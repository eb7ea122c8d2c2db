//! HTTP request value object

use crate::body::{parse_body, parse_query, BodyLimits, ParsedBody};
use crate::context::Service;
use crate::cookie::parse_cookie_header;
use crate::{id, Error, Result};
use smallvec::SmallVec;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use zephyr_router::Method;

/// Raw inbound request as handed over by the socket runtime
///
/// Wire parsing happens upstream; this is the transport boundary type the
/// dispatch core consumes.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: String,
    /// Path without the query string
    pub path: String,
    /// Query string without the leading `?`
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: bytes::Bytes,
}

impl RawRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: None,
            headers: Vec::new(),
            body: bytes::Bytes::new(),
        }
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<bytes::Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Get a header value (case-insensitive)
    pub fn header_value(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }
}

/// Parsed per-request value object
///
/// Identity fields (id, method, path) are immutable. The `user`, `session`
/// and `context` slots are write-once per request: the first write wins and
/// a second write is a [`Error::SlotOccupied`]. Cookies are parsed lazily
/// from the cookie header and cached.
pub struct HttpRequest {
    /// Opaque request id, generated at construction
    pub id: String,
    pub method: Method,
    pub path: String,
    /// Query string (without leading ?)
    pub query: Option<String>,
    /// Request headers (stack-allocated for small header counts)
    pub headers: SmallVec<[(String, String); 16]>,
    /// Body, eagerly parsed by content type at construction
    pub body: ParsedBody,
    /// Route parameters, bound after path-pattern matching
    pub params: HashMap<String, String>,
    cookies: OnceLock<HashMap<String, String>>,
    user: OnceLock<Service>,
    session: OnceLock<Service>,
    context: OnceLock<Service>,
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Slot contents are type-erased and not Debug
        f.debug_struct("HttpRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: id::generate_id(),
            method,
            path: path.into(),
            query: None,
            headers: SmallVec::new(),
            body: ParsedBody::Empty,
            params: HashMap::new(),
            cookies: OnceLock::new(),
            user: OnceLock::new(),
            session: OnceLock::new(),
            context: OnceLock::new(),
        }
    }

    /// Construct from a raw request, parsing the body under `limits`.
    ///
    /// Fails with a 400-class error on limit or parse violations, before
    /// any middleware can run. The method must be one the registration API
    /// accepts; anything else is reported as a route miss.
    pub fn from_raw(raw: RawRequest, limits: &BodyLimits) -> Result<Self> {
        let method = Method::parse(&raw.method).ok_or_else(|| Error::RouteNotFound {
            method: raw.method.clone(),
            path: raw.path.clone(),
        })?;

        let body = parse_body(raw.header_value("content-type"), &raw.body, limits)?;

        let mut request = Self::new(method, raw.path);
        request.query = raw.query;
        request.headers = raw.headers.into_iter().collect();
        request.body = body;
        Ok(request)
    }

    /// Get a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }

    /// Get a cookie value; the cookie header is parsed once and cached
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .get_or_init(|| {
                self.header("cookie")
                    .map(parse_cookie_header)
                    .unwrap_or_default()
            })
            .get(name)
            .map(String::as_str)
    }

    /// Get a route parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Get a route parameter, or a default
    pub fn param_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.param(name).unwrap_or(default)
    }

    /// Parse the query string into key-value pairs
    pub fn query_params(&self) -> HashMap<String, String> {
        self.query.as_deref().map(parse_query).unwrap_or_default()
    }

    /// Get one query parameter
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query_params().remove(name)
    }

    /// Get one query parameter, or a default
    pub fn query_param_or(&self, name: &str, default: &str) -> String {
        self.query_param(name)
            .unwrap_or_else(|| default.to_string())
    }

    /// Look up a body value (form field, multipart field, or JSON key)
    pub fn body_value(&self, key: &str) -> Option<String> {
        self.body.value(key)
    }

    /// Set the user slot; write-once per request
    pub fn set_user(&self, user: Service) -> Result<()> {
        self.user
            .set(user)
            .map_err(|_| Error::SlotOccupied("user"))
    }

    pub fn user<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.user.get().cloned().and_then(|s| s.downcast::<T>().ok())
    }

    /// Set the session slot; write-once per request
    pub fn set_session(&self, session: Service) -> Result<()> {
        self.session
            .set(session)
            .map_err(|_| Error::SlotOccupied("session"))
    }

    pub fn session<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.session
            .get()
            .cloned()
            .and_then(|s| s.downcast::<T>().ok())
    }

    /// Set the free-form context slot; write-once per request
    pub fn set_context(&self, context: Service) -> Result<()> {
        self.context
            .set(context)
            .map_err(|_| Error::SlotOccupied("context"))
    }

    pub fn context<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.context
            .get()
            .cloned()
            .and_then(|s| s.downcast::<T>().ok())
    }
}
