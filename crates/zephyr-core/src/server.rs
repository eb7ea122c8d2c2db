//! Request-dispatch orchestration
//!
//! The server owns the boot-time assembly (router, WebSocket registry,
//! base context, server-wide middleware) and drives each inbound raw
//! request through a fixed pipeline: upgrade attempt, route match, scope
//! clone, body-validated request construction, middleware chain, empty
//! check, on-end hooks, wire finalization. Every failure is converted to
//! a well-formed response at a single boundary; handler detail never
//! reaches the client on a 500.

use crate::body::BodyLimits;
use crate::context::{keys, ScopedContext};
use crate::error::ErrorEnvelope;
use crate::middleware::{Dispatcher, Exchange, Middleware};
use crate::request::{HttpRequest, RawRequest};
use crate::response::{HttpResponse, WireResponse};
use crate::routing::Router;
use crate::ws::{WebSocketServer, WsConnection};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    pub body_limits: BodyLimits,
    /// How long `shutdown` waits for in-flight requests to finish
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "0.0.0.0".to_string(),
            port: 3000,
            body_limits: BodyLimits::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Tracks in-flight requests for graceful shutdown
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    active: AtomicU64,
    shutting_down: AtomicBool,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Signal that shutdown is in progress; new requests get a 503
    pub fn start_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Wait for in-flight requests to drain, up to `grace`.
    /// `true` when everything finished in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        while self.count() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

/// Outcome of dispatching one raw request
pub enum Dispatched {
    /// Plain HTTP exchange, finalized
    Response(WireResponse),
    /// Accepted WebSocket upgrade: the 101 response plus the connection
    /// the transport drives through the lifecycle dispatchers
    Upgraded {
        response: WireResponse,
        connection: Arc<WsConnection>,
    },
}

/// The dispatch orchestrator
///
/// The router and WebSocket registry are shared behind `Arc` and bound
/// into the base context at boot, so handlers can resolve them like any
/// other service. Route registration takes the router's write lock;
/// the table is read-only once serving starts.
pub struct HttpServer {
    config: ServerConfig,
    base_context: ScopedContext,
    router: Arc<RwLock<Router>>,
    global_middleware: Vec<Middleware>,
    ws: Arc<WebSocketServer>,
    tracker: Arc<ConnectionTracker>,
}

impl Default for HttpServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl HttpServer {
    pub fn new(config: ServerConfig) -> Self {
        let router = Arc::new(RwLock::new(Router::new()));
        let ws = Arc::new(WebSocketServer::new());

        let mut base_context = ScopedContext::new();
        base_context.bind(keys::CONFIG, Arc::new(config.clone()));
        base_context.bind(keys::ROUTER, router.clone());
        base_context.bind(keys::WS_ROUTER, ws.clone());
        base_context.bind(keys::WS_SESSIONS, ws.sessions().clone());

        Self {
            config,
            base_context,
            router,
            global_middleware: Vec::new(),
            ws,
            tracker: Arc::new(ConnectionTracker::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared router; registration goes through the write lock
    pub fn router(&self) -> &Arc<RwLock<Router>> {
        &self.router
    }

    pub fn ws(&self) -> &Arc<WebSocketServer> {
        &self.ws
    }

    /// Base context, populated at boot and cloned per request
    pub fn context_mut(&mut self) -> &mut ScopedContext {
        &mut self.base_context
    }

    pub fn base_context(&self) -> &ScopedContext {
        &self.base_context
    }

    /// Append a server-wide middleware; runs before route middleware
    pub fn use_middleware(&mut self, middleware: Middleware) -> &mut Self {
        self.global_middleware.push(middleware);
        self
    }

    pub fn tracker(&self) -> &Arc<ConnectionTracker> {
        &self.tracker
    }

    /// Drive one raw request through the pipeline
    pub async fn dispatch(&self, raw: RawRequest) -> Dispatched {
        if self.tracker.is_shutting_down() {
            let mut response = HttpResponse::new();
            response.set_status(503u16).text("Service Unavailable");
            return Dispatched::Response(response.finalize());
        }

        self.tracker.begin();
        let outcome = self.dispatch_inner(raw).await;
        self.tracker.finish();
        outcome
    }

    async fn dispatch_inner(&self, raw: RawRequest) -> Dispatched {
        // Upgrades bypass the HTTP pipeline entirely
        if let Some(upgrade) = self.ws.try_upgrade(&raw) {
            return Dispatched::Upgraded {
                response: upgrade.response.finalize(),
                connection: upgrade.connection,
            };
        }

        let method = raw.method.clone();
        let path = raw.path.clone();
        let wire = match self.handle_http(raw).await {
            Ok(wire) => wire,
            Err(err) => self.error_response(&method, &path, &err),
        };
        Dispatched::Response(wire)
    }

    async fn handle_http(&self, raw: RawRequest) -> Result<WireResponse> {
        let started = Instant::now();

        let method = zephyr_router::Method::parse(&raw.method).ok_or_else(|| {
            Error::RouteNotFound {
                method: raw.method.clone(),
                path: raw.path.clone(),
            }
        })?;

        // Clone everything out of the read guard; it must not be held
        // across an await point.
        let (params, middleware, handler) = {
            let router = self.router.read();
            let hit = router
                .match_route(method, &raw.path)
                .ok_or_else(|| Error::RouteNotFound {
                    method: raw.method.clone(),
                    path: raw.path.clone(),
                })?;
            let target = hit.route.value();
            let mut middleware =
                Vec::with_capacity(self.global_middleware.len() + target.middleware.len());
            middleware.extend(self.global_middleware.iter().cloned());
            middleware.extend(target.middleware.iter().cloned());
            (hit.params_map(), middleware, target.handler.clone())
        };

        // Body parsing and limit checks run before any middleware
        let mut request = HttpRequest::from_raw(raw, &self.config.body_limits)?;
        request.params = params;
        let request = Arc::new(request);

        let mut scope = self.base_context.clone_scope();
        scope.bind_service(keys::REQUEST, request.clone());

        let dispatcher = Dispatcher::new(middleware, handler)?;
        let exchange = Exchange {
            request,
            response: HttpResponse::new(),
            context: scope,
        };
        let mut exchange = dispatcher.run(exchange).await?;

        // A chain that never committed a body is a handler bug, not a 200
        if exchange.response.is_empty() {
            return Err(Error::EmptyResponse);
        }

        for hook in exchange.response.take_hooks() {
            hook(&exchange.request, &mut exchange.response);
        }

        info!(
            method = %exchange.request.method,
            path = %exchange.request.path,
            status = exchange.response.status.as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            request_id = %exchange.request.id,
            "request completed"
        );
        Ok(exchange.response.finalize())
    }

    /// Single error boundary: every failure becomes a well-formed response
    fn error_response(&self, method: &str, path: &str, err: &Error) -> WireResponse {
        let mut response = HttpResponse::new();
        match err.status() {
            404 => {
                if matches!(err, Error::EmptyResponse) {
                    warn!(%method, %path, "chain completed without a response");
                } else {
                    warn!(%method, %path, error = %err, "no route matched");
                }
                response.not_found();
            }
            400 => {
                warn!(%method, %path, error = %err, "request rejected");
                let envelope = ErrorEnvelope::from_error(err);
                response
                    .set_status(400u16)
                    .add_header("content-type", "application/json")
                    .text(envelope.to_json());
            }
            _ => {
                // Detail goes to the log, never to the client
                error!(%method, %path, error = %err, "request failed");
                response.set_status(500u16).text("Internal Server Error");
            }
        }
        response.finalize()
    }

    /// Stop accepting work, then wait out in-flight requests
    pub async fn shutdown(&self) -> bool {
        info!(active = self.tracker.count(), "shutdown requested");
        self.tracker.start_shutdown();
        let drained = self.tracker.drain(self.config.shutdown_grace).await;
        if drained {
            info!("all requests drained");
        } else {
            warn!(active = self.tracker.count(), "shutdown grace expired");
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{handler_fn, middleware_fn, Next};
    use crate::ws::WsHandlerBundle;
    use bytes::Bytes;

    fn wire(dispatched: Dispatched) -> WireResponse {
        match dispatched {
            Dispatched::Response(wire) => wire,
            Dispatched::Upgraded { .. } => panic!("expected plain response"),
        }
    }

    /// Collects formatted log output so tests can assert on its content
    #[derive(Clone, Default)]
    struct LogCapture(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl LogCapture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
        type Writer = LogCapture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
        let capture = LogCapture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    #[tokio::test]
    async fn test_dispatch_happy_path() {
        let server = HttpServer::default();
        server.router().write().get(
            "/users/:id",
            handler_fn(|mut ex: Exchange| async move {
                let id = ex.request.param_or("id", "?").to_string();
                ex.response.json(serde_json::json!({ "id": id }));
                Ok(ex)
            }),
        );

        let out = wire(server.dispatch(RawRequest::new("GET", "/users/7")).await);
        assert_eq!(out.status.as_u16(), 200);
        assert_eq!(out.header("content-type"), Some("application/json"));
        assert!(out.body_string().unwrap().contains(r#""id":"7""#));
    }

    #[tokio::test]
    async fn test_route_miss_is_404() {
        let server = HttpServer::default();
        let out = wire(server.dispatch(RawRequest::new("GET", "/nowhere")).await);
        assert_eq!(out.status.as_u16(), 404);
        assert_eq!(out.body_string().unwrap(), "Not Found");
    }

    #[tokio::test]
    async fn test_unsupported_method_is_404() {
        let server = HttpServer::default();
        server.router().write().get(
            "/x",
            handler_fn(|mut ex: Exchange| async move {
                ex.response.text("ok");
                Ok(ex)
            }),
        );

        let out = wire(server.dispatch(RawRequest::new("TRACE", "/x")).await);
        assert_eq!(out.status.as_u16(), 404);
    }

    #[tokio::test]
    async fn test_body_limit_violation_is_400_envelope() {
        let config = ServerConfig {
            body_limits: BodyLimits {
                max_body_size: 4,
                ..BodyLimits::default()
            },
            ..ServerConfig::default()
        };
        let mut server = HttpServer::new(config);

        let middleware_ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran = middleware_ran.clone();
        server.use_middleware(middleware_fn(move |ex: Exchange, next: Next| {
            let ran = ran.clone();
            async move {
                ran.store(true, Ordering::SeqCst);
                next.run(ex).await
            }
        }));
        server.router().write().post(
            "/upload",
            handler_fn(|mut ex: Exchange| async move {
                ex.response.text("stored");
                Ok(ex)
            }),
        );

        let raw = RawRequest::new("POST", "/upload")
            .header("content-type", "text/plain")
            .body(Bytes::from_static(b"way too big"));
        let out = wire(server.dispatch(raw).await);

        assert_eq!(out.status.as_u16(), 400);
        assert_eq!(out.header("content-type"), Some("application/json"));
        let body = out.body_string().unwrap();
        assert!(body.contains("REQUEST_TOO_LARGE"));
        // Both sizes are named in the message
        assert!(body.contains("11") && body.contains('4'));
        // The violation aborts before any middleware runs
        assert!(!middleware_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_chain_response_is_404() {
        let server = HttpServer::default();
        server.router().write().get(
            "/forgot",
            handler_fn(|ex: Exchange| async move { Ok(ex) }),
        );

        let out = wire(server.dispatch(RawRequest::new("GET", "/forgot")).await);
        assert_eq!(out.status.as_u16(), 404);
    }

    #[tokio::test]
    async fn test_empty_chain_logged_as_handler_bug_not_route_miss() {
        let (capture, _guard) = capture_logs();

        let server = HttpServer::default();
        server.router().write().get(
            "/forgot",
            handler_fn(|ex: Exchange| async move { Ok(ex) }),
        );

        let out = wire(server.dispatch(RawRequest::new("GET", "/forgot")).await);
        assert_eq!(out.status.as_u16(), 404);

        let log = capture.contents();
        assert!(log.contains("chain completed without a response"));
        assert!(!log.contains("no route matched"));
    }

    #[tokio::test]
    async fn test_handler_error_is_opaque_500() {
        let server = HttpServer::default();
        server.router().write().get(
            "/boom",
            handler_fn(|_ex: Exchange| async move {
                Err(Error::Handler("secret database password leaked".to_string()))
            }),
        );

        let out = wire(server.dispatch(RawRequest::new("GET", "/boom")).await);
        assert_eq!(out.status.as_u16(), 500);
        let body = out.body_string().unwrap();
        assert_eq!(body, "Internal Server Error");
        assert!(!body.contains("secret"));
    }

    #[tokio::test]
    async fn test_boundary_log_carries_method_and_path() {
        let (capture, _guard) = capture_logs();

        let server = HttpServer::default();
        server.router().write().post(
            "/boom",
            handler_fn(|_ex: Exchange| async move {
                Err(Error::Handler("backend unreachable".to_string()))
            }),
        );

        let out = wire(server.dispatch(RawRequest::new("POST", "/boom")).await);
        assert_eq!(out.status.as_u16(), 500);

        // The failure log names the request, not just the error
        let log = capture.contents();
        assert!(log.contains("POST"));
        assert!(log.contains("/boom"));
        assert!(log.contains("backend unreachable"));
    }

    #[tokio::test]
    async fn test_global_middleware_runs_before_route_middleware() {
        let mut server = HttpServer::default();
        server.use_middleware(middleware_fn(|mut ex: Exchange, next: Next| async move {
            ex.response.add_header("x-order", "global");
            next.run(ex).await
        }));
        server.router().write().route(
            zephyr_router::Method::Get,
            "/ordered",
            handler_fn(|mut ex: Exchange| async move {
                ex.response.text("ok");
                Ok(ex)
            }),
            vec![middleware_fn(|mut ex: Exchange, next: Next| async move {
                ex.response.add_header("x-order", "route");
                next.run(ex).await
            })],
            std::collections::HashMap::new(),
        );

        let out = wire(server.dispatch(RawRequest::new("GET", "/ordered")).await);
        let order: Vec<&str> = out
            .headers
            .iter()
            .filter(|(k, _)| k == "x-order")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(order, vec!["global", "route"]);
    }

    #[tokio::test]
    async fn test_request_bound_into_scope() {
        let server = HttpServer::default();
        server.router().write().get(
            "/scoped",
            handler_fn(|mut ex: Exchange| async move {
                let bound: Arc<HttpRequest> = ex
                    .context
                    .resolve(keys::REQUEST)
                    .ok_or_else(|| Error::Internal("request not bound".to_string()))?;
                // Same request instance the exchange carries
                ex.response.text(if Arc::ptr_eq(&bound, &ex.request) {
                    "same"
                } else {
                    "different"
                });
                Ok(ex)
            }),
        );

        let out = wire(server.dispatch(RawRequest::new("GET", "/scoped")).await);
        assert_eq!(out.body_string().unwrap(), "same");
    }

    #[tokio::test]
    async fn test_router_and_ws_registry_resolvable_from_scope() {
        let server = HttpServer::default();
        server.ws().register("/live", WsHandlerBundle::new()).unwrap();
        server.router().write().get(
            "/introspect",
            handler_fn(|mut ex: Exchange| async move {
                let router: Arc<RwLock<Router>> = ex
                    .context
                    .resolve(keys::ROUTER)
                    .ok_or_else(|| Error::Internal("router not bound".to_string()))?;
                let ws: Arc<WebSocketServer> = ex
                    .context
                    .resolve(keys::WS_ROUTER)
                    .ok_or_else(|| Error::Internal("ws registry not bound".to_string()))?;
                let routes = router.read().collection().len();
                let live = ws.resolve("/live").is_some();
                ex.response
                    .json(serde_json::json!({ "routes": routes, "live": live }));
                Ok(ex)
            }),
        );

        let out = wire(server.dispatch(RawRequest::new("GET", "/introspect")).await);
        assert_eq!(out.status.as_u16(), 200);
        let body = out.body_string().unwrap();
        assert!(body.contains(r#""routes":1"#));
        assert!(body.contains(r#""live":true"#));
    }

    #[tokio::test]
    async fn test_scope_bindings_do_not_leak_across_requests() {
        let server = HttpServer::default();
        server.router().write().get(
            "/leaky",
            handler_fn(|mut ex: Exchange| async move {
                let seen = ex.context.contains("per-request");
                ex.context.bind("per-request", Arc::new(true));
                ex.response.text(if seen { "leaked" } else { "clean" });
                Ok(ex)
            }),
        );

        // Concurrent requests each see a fresh scope
        let (first, second) = tokio::join!(
            server.dispatch(RawRequest::new("GET", "/leaky")),
            server.dispatch(RawRequest::new("GET", "/leaky")),
        );
        assert_eq!(wire(first).body_string().unwrap(), "clean");
        assert_eq!(wire(second).body_string().unwrap(), "clean");
        // And the base context stays untouched for later requests
        let third = wire(server.dispatch(RawRequest::new("GET", "/leaky")).await);
        assert_eq!(third.body_string().unwrap(), "clean");
    }

    #[tokio::test]
    async fn test_on_end_hooks_run_before_finalize() {
        let server = HttpServer::default();
        server.router().write().get(
            "/hooked",
            handler_fn(|mut ex: Exchange| async move {
                ex.response.text("ok");
                ex.response.on_end(Box::new(|req, res| {
                    res.add_header("x-request-id", req.id.clone());
                }));
                Ok(ex)
            }),
        );

        let out = wire(server.dispatch(RawRequest::new("GET", "/hooked")).await);
        assert!(out.header("x-request-id").is_some());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_requests() {
        let server = HttpServer::default();
        server.router().write().get(
            "/live",
            handler_fn(|mut ex: Exchange| async move {
                ex.response.text("ok");
                Ok(ex)
            }),
        );

        server.tracker().start_shutdown();
        let out = wire(server.dispatch(RawRequest::new("GET", "/live")).await);
        assert_eq!(out.status.as_u16(), 503);
    }

    #[tokio::test]
    async fn test_drain_completes_when_idle() {
        let server = HttpServer::default();
        assert!(server.shutdown().await);
    }

    #[tokio::test]
    async fn test_upgrade_takes_precedence_over_http_route() {
        let server = HttpServer::default();
        server.router().write().get(
            "/chat",
            handler_fn(|mut ex: Exchange| async move {
                ex.response.text("http");
                Ok(ex)
            }),
        );
        server
            .ws()
            .register("/chat", WsHandlerBundle::new())
            .unwrap();

        let raw = RawRequest::new("GET", "/chat")
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");

        match server.dispatch(raw).await {
            Dispatched::Upgraded {
                response,
                connection,
            } => {
                assert_eq!(response.status.as_u16(), 101);
                assert_eq!(connection.path, "/chat");
            }
            Dispatched::Response(_) => panic!("expected upgrade"),
        }

        // Without the upgrade headers the HTTP route still answers
        let out = wire(server.dispatch(RawRequest::new("GET", "/chat")).await);
        assert_eq!(out.body_string().unwrap(), "http");
    }
}
