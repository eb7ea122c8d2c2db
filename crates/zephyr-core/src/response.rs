//! HTTP response value object

use crate::cookie::Cookie;
use crate::request::HttpRequest;
use smallvec::SmallVec;

/// HTTP Status Code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);

    /// Get the numeric code
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Get the reason phrase
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            409 => "Conflict",
            422 => "Unprocessable Entity",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.0)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.0)
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

/// Body payload; exactly one kind describes the body at finalization
#[derive(Debug, Clone)]
pub enum Payload {
    Absent,
    Text(String),
    Html(String),
    Json(serde_json::Value),
    Bytes(bytes::Bytes),
}

/// Hook run after the handler chain completes, before wire finalization
pub type EndHook = Box<dyn FnOnce(&HttpRequest, &mut HttpResponse) + Send>;

/// Response under construction
///
/// Body setters are mutually exclusive with last-writer-wins semantics.
/// `redirect` and `not_found` also commit the response, so a chain that
/// redirected is not mistaken for an empty (404) outcome.
pub struct HttpResponse {
    pub status: StatusCode,
    /// Header multimap (append semantics)
    pub headers: SmallVec<[(String, String); 8]>,
    cookies: SmallVec<[Cookie; 4]>,
    payload: Payload,
    hooks: Vec<EndHook>,
    committed: bool,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("payload", &self.payload)
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: SmallVec::new(),
            cookies: SmallVec::new(),
            payload: Payload::Absent,
            hooks: Vec::new(),
            committed: false,
        }
    }

    pub fn set_status(&mut self, status: impl Into<StatusCode>) -> &mut Self {
        self.status = status.into();
        self
    }

    /// Append a header (multimap semantics)
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header value with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }

    /// Queue a cookie, emitted as one Set-Cookie header at finalization
    pub fn add_cookie(&mut self, cookie: Cookie) -> &mut Self {
        self.cookies.push(cookie);
        self
    }

    pub fn text(&mut self, body: impl Into<String>) -> &mut Self {
        self.payload = Payload::Text(body.into());
        self.committed = true;
        self
    }

    pub fn html(&mut self, body: impl Into<String>) -> &mut Self {
        self.payload = Payload::Html(body.into());
        self.committed = true;
        self
    }

    pub fn json(&mut self, body: serde_json::Value) -> &mut Self {
        self.payload = Payload::Json(body);
        self.committed = true;
        self
    }

    pub fn bytes(&mut self, body: impl Into<bytes::Bytes>) -> &mut Self {
        self.payload = Payload::Bytes(body.into());
        self.committed = true;
        self
    }

    /// Commit a redirect; the payload stays absent
    pub fn redirect(&mut self, location: impl Into<String>) -> &mut Self {
        self.status = StatusCode::FOUND;
        self.add_header("location", location);
        self.committed = true;
        self
    }

    pub fn not_found(&mut self) -> &mut Self {
        self.status = StatusCode::NOT_FOUND;
        self.payload = Payload::Text("Not Found".to_string());
        self.committed = true;
        self
    }

    /// Register an on-end hook, run in registration order
    pub fn on_end(&mut self, hook: EndHook) -> &mut Self {
        self.hooks.push(hook);
        self
    }

    /// Take the registered hooks for the caller to run
    pub fn take_hooks(&mut self) -> Vec<EndHook> {
        std::mem::take(&mut self.hooks)
    }

    /// True while no body setter has committed the response
    pub fn is_empty(&self) -> bool {
        !self.committed
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Produce the wire response: encoded payload, implied content type
    /// (unless overridden), one Set-Cookie header per pending cookie.
    pub fn finalize(self) -> WireResponse {
        let (body, content_type): (bytes::Bytes, Option<&str>) = match self.payload {
            Payload::Absent => (bytes::Bytes::new(), None),
            Payload::Text(text) => (text.into(), Some("text/plain; charset=utf-8")),
            Payload::Html(html) => (html.into(), Some("text/html; charset=utf-8")),
            Payload::Json(value) => (
                serde_json::to_vec(&value).unwrap_or_default().into(),
                Some("application/json"),
            ),
            Payload::Bytes(bytes) => (bytes, Some("application/octet-stream")),
        };

        let mut headers: Vec<(String, String)> = self.headers.into_iter().collect();
        if let Some(default_type) = content_type {
            let has_type = headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
            if !has_type {
                headers.push(("content-type".to_string(), default_type.to_string()));
            }
        }
        for cookie in &self.cookies {
            headers.push(("set-cookie".to_string(), cookie.to_header_value()));
        }

        WireResponse {
            status: self.status,
            headers,
            body,
        }
    }
}

/// Finalized wire-level response
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: bytes::Bytes,
}

impl WireResponse {
    /// Get a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as string (if UTF-8)
    pub fn body_string(&self) -> Option<String> {
        std::str::from_utf8(&self.body).ok().map(|s| s.to_string())
    }

    /// Serialize to HTTP/1.1 wire format
    pub fn to_http1_bytes(&self) -> bytes::Bytes {
        let mut buf = Vec::with_capacity(256 + self.body.len());

        buf.extend_from_slice(b"HTTP/1.1 ");
        buf.extend_from_slice(self.status.0.to_string().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.status.reason_phrase().as_bytes());
        buf.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        if !self.body.is_empty() {
            buf.extend_from_slice(b"content-length: ");
            buf.extend_from_slice(self.body.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(&self.body);

        bytes::Bytes::from(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookie::SameSite;

    #[test]
    fn test_status_code() {
        assert!(StatusCode::OK.is_success());
        assert!(StatusCode::NOT_FOUND.is_client_error());
        assert!(StatusCode::INTERNAL_SERVER_ERROR.is_server_error());
    }

    #[test]
    fn test_empty_until_committed() {
        let mut res = HttpResponse::new();
        assert!(res.is_empty());

        res.set_status(201u16).add_header("x-custom", "1");
        // Status and headers alone do not commit a body
        assert!(res.is_empty());

        res.text("done");
        assert!(!res.is_empty());
    }

    #[test]
    fn test_last_writer_wins() {
        let mut res = HttpResponse::new();
        res.text("first");
        res.json(serde_json::json!({"second": true}));

        let wire = res.finalize();
        assert_eq!(wire.header("content-type"), Some("application/json"));
        assert!(wire.body_string().unwrap().contains("second"));
    }

    #[test]
    fn test_redirect_commits_without_payload() {
        let mut res = HttpResponse::new();
        res.redirect("/login");
        assert!(!res.is_empty());

        let wire = res.finalize();
        assert_eq!(wire.status, StatusCode::FOUND);
        assert_eq!(wire.header("location"), Some("/login"));
        assert!(wire.body.is_empty());
    }

    #[test]
    fn test_set_cookie_once_per_cookie() {
        let mut res = HttpResponse::new();
        res.text("ok");
        res.add_cookie(Cookie::new("sid", "abc").http_only());
        res.add_cookie(Cookie::new("theme", "dark").same_site(SameSite::Lax));

        let wire = res.finalize();
        let set_cookies: Vec<&str> = wire
            .headers
            .iter()
            .filter(|(k, _)| k == "set-cookie")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(set_cookies.len(), 2);
        assert!(set_cookies[0].contains("sid=abc"));
        assert!(set_cookies[1].contains("theme=dark"));
    }

    #[test]
    fn test_explicit_content_type_wins() {
        let mut res = HttpResponse::new();
        res.add_header("content-type", "application/vnd.custom+json");
        res.text("{}");

        let wire = res.finalize();
        assert_eq!(
            wire.header("content-type"),
            Some("application/vnd.custom+json")
        );
    }

    #[test]
    fn test_to_http1_bytes() {
        let mut res = HttpResponse::new();
        res.add_header("x-custom", "value").text("Hello");

        let bytes = res.finalize().to_http1_bytes();
        let s = std::str::from_utf8(&bytes).unwrap();

        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("x-custom: value\r\n"));
        assert!(s.contains("content-length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn test_hooks_run_in_registration_order() {
        let mut res = HttpResponse::new();
        res.text("body");
        res.on_end(Box::new(|_req, res| {
            res.add_header("x-order", "first");
        }));
        res.on_end(Box::new(|_req, res| {
            res.add_header("x-order", "second");
        }));

        let req = HttpRequest::new(zephyr_router::Method::Get, "/");
        let hooks = res.take_hooks();
        for hook in hooks {
            hook(&req, &mut res);
        }

        let values: Vec<&str> = res
            .headers
            .iter()
            .filter(|(k, _)| k == "x-order")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(values, vec!["first", "second"]);
    }
}
