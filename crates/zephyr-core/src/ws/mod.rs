//! WebSocket routing, connections and sessions
//!
//! Upgrade requests are matched against registered paths before the HTTP
//! router sees them. Paths are normalized (lowercase, leading slash,
//! trailing slashes trimmed) at registration and lookup, so `/Chat` and
//! `/chat/` name the same endpoint. Connection lifecycle events are
//! dispatched to per-path handler bundles; each dispatch gets its own
//! scope cloned from the context supplied by the caller.

pub mod handshake;

use crate::context::ScopedContext;
use crate::id;
use crate::middleware::BoxFuture;
use crate::request::RawRequest;
use crate::response::HttpResponse;
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Message exchanged over an established connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Server-side session attached to one connection
#[derive(Debug, Clone)]
pub struct WsSession {
    pub id: String,
    /// Unix epoch milliseconds
    pub created_at: u64,
    /// Bumped on every data update
    pub updated_at: u64,
    pub data: HashMap<String, serde_json::Value>,
}

fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Session table shared across connections
///
/// `remove` is idempotent; a close racing another close must not fail.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, WsSession>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session and return a snapshot of it
    pub fn create(&self) -> WsSession {
        let now = epoch_millis();
        let session = WsSession {
            id: id::generate_id(),
            created_at: now,
            updated_at: now,
            data: HashMap::new(),
        };
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        session
    }

    /// Snapshot of a session, if present
    pub fn get(&self, id: &str) -> Option<WsSession> {
        self.sessions.read().get(id).cloned()
    }

    /// Set one data entry and bump `updated_at`. `false` if the session
    /// is gone.
    pub fn update(&self, id: &str, key: impl Into<String>, value: serde_json::Value) -> bool {
        let mut table = self.sessions.write();
        match table.get_mut(id) {
            Some(session) => {
                session.data.insert(key.into(), value);
                session.updated_at = epoch_millis();
                true
            }
            None => false,
        }
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub fn remove(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

type OpenCallback =
    Arc<dyn Fn(Arc<WsConnection>, ScopedContext) -> BoxFuture<Result<()>> + Send + Sync>;
type MessageCallback = Arc<
    dyn Fn(Arc<WsConnection>, ScopedContext, WsMessage) -> BoxFuture<Result<()>> + Send + Sync,
>;
type ErrorCallback =
    Arc<dyn Fn(Arc<WsConnection>, ScopedContext, String) -> BoxFuture<Result<()>> + Send + Sync>;

/// Lifecycle callbacks for one registered path
#[derive(Default, Clone)]
pub struct WsHandlerBundle {
    on_open: Option<OpenCallback>,
    on_message: Option<MessageCallback>,
    on_close: Option<OpenCallback>,
    on_drain: Option<OpenCallback>,
    on_error: Option<ErrorCallback>,
}

impl WsHandlerBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<WsConnection>, ScopedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_open = Some(Arc::new(move |conn, ctx| Box::pin(f(conn, ctx))));
        self
    }

    pub fn on_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<WsConnection>, ScopedContext, WsMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_message = Some(Arc::new(move |conn, ctx, msg| Box::pin(f(conn, ctx, msg))));
        self
    }

    pub fn on_close<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<WsConnection>, ScopedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_close = Some(Arc::new(move |conn, ctx| Box::pin(f(conn, ctx))));
        self
    }

    /// Called when the outbound buffer has drained after backpressure
    pub fn on_drain<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<WsConnection>, ScopedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_drain = Some(Arc::new(move |conn, ctx| Box::pin(f(conn, ctx))));
        self
    }

    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<WsConnection>, ScopedContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |conn, ctx, msg| Box::pin(f(conn, ctx, msg))));
        self
    }
}

/// One established connection
///
/// Shared as `Arc` between the transport and handler callbacks; outbound
/// messages are queued in an internal buffer the transport drains.
pub struct WsConnection {
    pub id: String,
    /// Normalized endpoint path the connection was accepted on
    pub path: String,
    pub query_params: HashMap<String, String>,
    session_id: Mutex<Option<String>>,
    outbox: Mutex<Vec<WsMessage>>,
    closed: AtomicBool,
    close_dispatched: AtomicBool,
    bundle: Arc<WsHandlerBundle>,
}

impl WsConnection {
    fn new(path: String, query_params: HashMap<String, String>, bundle: Arc<WsHandlerBundle>) -> Self {
        Self {
            id: id::generate_id(),
            path,
            query_params,
            session_id: Mutex::new(None),
            outbox: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_dispatched: AtomicBool::new(false),
            bundle,
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// Queue a text message. `false` once the connection is closed.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(WsMessage::Text(text.into()))
    }

    /// Queue a binary message. `false` once the connection is closed.
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> bool {
        self.send(WsMessage::Binary(data.into()))
    }

    fn send(&self, message: WsMessage) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outbox.lock().push(message);
        true
    }

    /// Drain queued outbound messages for the transport to write
    pub fn take_outbox(&self) -> Vec<WsMessage> {
        std::mem::take(&mut *self.outbox.lock())
    }

    /// Mark the connection closed; later sends are dropped
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Accepted upgrade: the 101 response plus the new connection
pub struct WsUpgrade {
    pub response: HttpResponse,
    pub connection: Arc<WsConnection>,
}

/// Normalize an endpoint path: lowercase, leading slash, trailing slashes
/// trimmed. The root path stays `/`.
fn normalize_path(path: &str) -> String {
    let lowered = path.to_lowercase();
    let trimmed = lowered.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// WebSocket endpoint registry and lifecycle dispatcher
///
/// Registration goes through a lock so the registry can be shared (and
/// bound into the base context) while endpoints are still being added at
/// boot. The table is read-only once serving starts.
#[derive(Default)]
pub struct WebSocketServer {
    routes: RwLock<HashMap<String, Arc<WsHandlerBundle>>>,
    sessions: Arc<SessionManager>,
}

impl WebSocketServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Register a handler bundle under a path.
    ///
    /// The path is normalized first; registering two paths that normalize
    /// to the same endpoint is an error.
    pub fn register(&self, path: &str, bundle: WsHandlerBundle) -> Result<()> {
        let normalized = normalize_path(path);
        let mut routes = self.routes.write();
        if routes.contains_key(&normalized) {
            return Err(Error::DuplicateWsRoute(normalized));
        }
        debug!(path = %normalized, "websocket endpoint registered");
        routes.insert(normalized, Arc::new(bundle));
        Ok(())
    }

    /// Handler bundle for a (normalized) path
    pub fn resolve(&self, path: &str) -> Option<Arc<WsHandlerBundle>> {
        self.routes.read().get(&normalize_path(path)).cloned()
    }

    /// Attempt the upgrade. `None` when the request is not an upgrade or
    /// no endpoint is registered for its path; the caller then falls back
    /// to HTTP dispatch.
    pub fn try_upgrade(&self, raw: &RawRequest) -> Option<WsUpgrade> {
        if !handshake::is_upgrade_request(raw) {
            return None;
        }
        let bundle = self.resolve(&raw.path)?;
        let response = handshake::upgrade_response(raw)?;

        let query_params = raw
            .query
            .as_deref()
            .map(crate::body::parse_query)
            .unwrap_or_default();
        let connection = Arc::new(WsConnection::new(
            normalize_path(&raw.path),
            query_params,
            bundle,
        ));

        debug!(connection = %connection.id, path = %connection.path, "websocket upgrade accepted");
        Some(WsUpgrade {
            response,
            connection,
        })
    }

    /// Open lifecycle: create exactly one session, then run `on_open`
    pub async fn dispatch_open(&self, connection: &Arc<WsConnection>, base: &ScopedContext) {
        let session = self.sessions.create();
        *connection.session_id.lock() = Some(session.id);

        if let Some(callback) = connection.bundle.on_open.clone() {
            if let Err(err) = callback(connection.clone(), base.clone_scope()).await {
                error!(connection = %connection.id, error = %err, "websocket open handler failed");
            }
        }
    }

    /// Deliver one inbound message. Messages after close are dropped.
    pub async fn dispatch_message(
        &self,
        connection: &Arc<WsConnection>,
        base: &ScopedContext,
        message: WsMessage,
    ) {
        if connection.is_closed() {
            return;
        }
        if let Some(callback) = connection.bundle.on_message.clone() {
            if let Err(err) = callback(connection.clone(), base.clone_scope(), message).await {
                error!(connection = %connection.id, error = %err, "websocket message handler failed");
            }
        }
    }

    /// Close lifecycle: runs at most once per connection, removes the
    /// session, then runs `on_close`
    pub async fn dispatch_close(&self, connection: &Arc<WsConnection>, base: &ScopedContext) {
        if connection.close_dispatched.swap(true, Ordering::SeqCst) {
            return;
        }
        connection.close();

        if let Some(session_id) = connection.session_id() {
            self.sessions.remove(&session_id);
        }

        if let Some(callback) = connection.bundle.on_close.clone() {
            if let Err(err) = callback(connection.clone(), base.clone_scope()).await {
                error!(connection = %connection.id, error = %err, "websocket close handler failed");
            }
        }
    }

    /// Backpressure drained; run `on_drain` if registered
    pub async fn dispatch_drain(&self, connection: &Arc<WsConnection>, base: &ScopedContext) {
        if let Some(callback) = connection.bundle.on_drain.clone() {
            if let Err(err) = callback(connection.clone(), base.clone_scope()).await {
                error!(connection = %connection.id, error = %err, "websocket drain handler failed");
            }
        }
    }

    /// Transport-level error; the connection stays open unless the
    /// transport closes it separately
    pub async fn dispatch_error(
        &self,
        connection: &Arc<WsConnection>,
        base: &ScopedContext,
        message: String,
    ) {
        match connection.bundle.on_error.clone() {
            Some(callback) => {
                if let Err(err) =
                    callback(connection.clone(), base.clone_scope(), message).await
                {
                    error!(connection = %connection.id, error = %err, "websocket error handler failed");
                }
            }
            None => {
                error!(connection = %connection.id, error = %message, "websocket transport error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request(path: &str) -> RawRequest {
        RawRequest::new("GET", path)
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(normalize_path("/Chat"), "/chat");
        assert_eq!(normalize_path("/chat/"), "/chat");
        assert_eq!(normalize_path("chat"), "/chat");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/a/B/"), "/a/b");
    }

    #[test]
    fn test_register_normalizes_and_rejects_duplicates() {
        let ws = WebSocketServer::new();
        ws.register("/Chat", WsHandlerBundle::new()).unwrap();

        assert!(ws.resolve("/chat").is_some());
        assert!(ws.resolve("/chat/").is_some());
        assert!(ws.resolve("/CHAT").is_some());

        // Same endpoint under a different spelling
        let err = ws.register("/chat/", WsHandlerBundle::new()).unwrap_err();
        assert!(matches!(err, Error::DuplicateWsRoute(_)));
    }

    #[test]
    fn test_try_upgrade_requires_registered_endpoint() {
        let ws = WebSocketServer::new();
        ws.register("/chat", WsHandlerBundle::new()).unwrap();

        assert!(ws.try_upgrade(&upgrade_request("/chat")).is_some());
        assert!(ws.try_upgrade(&upgrade_request("/Chat/")).is_some());
        assert!(ws.try_upgrade(&upgrade_request("/other")).is_none());
        // A plain request never upgrades
        assert!(ws.try_upgrade(&RawRequest::new("GET", "/chat")).is_none());
    }

    #[test]
    fn test_upgrade_carries_query_params() {
        let ws = WebSocketServer::new();
        ws.register("/chat", WsHandlerBundle::new()).unwrap();

        let raw = upgrade_request("/chat").query("room=lobby");
        let upgrade = ws.try_upgrade(&raw).unwrap();
        assert_eq!(
            upgrade.connection.query_params.get("room"),
            Some(&"lobby".to_string())
        );
        assert_eq!(upgrade.response.status.as_u16(), 101);
    }

    #[test]
    fn test_outbox_and_close() {
        let conn = WsConnection::new("/chat".to_string(), HashMap::new(), Arc::default());

        assert!(conn.send_text("hello"));
        assert!(conn.send_binary(vec![1, 2, 3]));
        assert_eq!(
            conn.take_outbox(),
            vec![
                WsMessage::Text("hello".to_string()),
                WsMessage::Binary(vec![1, 2, 3]),
            ]
        );
        assert!(conn.take_outbox().is_empty());

        conn.close();
        assert!(!conn.send_text("dropped"));
        assert!(conn.take_outbox().is_empty());
    }

    #[tokio::test]
    async fn test_open_creates_one_session_and_close_removes_it() {
        let ws = WebSocketServer::new();
        ws.register("/chat", WsHandlerBundle::new()).unwrap();
        let ctx = ScopedContext::new();

        let upgrade = ws.try_upgrade(&upgrade_request("/chat")).unwrap();
        assert!(upgrade.connection.session_id().is_none());

        ws.dispatch_open(&upgrade.connection, &ctx).await;
        let session_id = upgrade.connection.session_id().unwrap();
        assert_eq!(ws.sessions().len(), 1);
        assert!(ws.sessions().get(&session_id).is_some());

        ws.dispatch_close(&upgrade.connection, &ctx).await;
        assert_eq!(ws.sessions().len(), 0);
        assert!(upgrade.connection.is_closed());
    }

    #[tokio::test]
    async fn test_double_close_runs_once() {
        use std::sync::atomic::AtomicUsize;

        let closes = Arc::new(AtomicUsize::new(0));
        let closes_cb = closes.clone();

        let ws = WebSocketServer::new();
        ws.register(
            "/chat",
            WsHandlerBundle::new().on_close(move |_conn, _ctx| {
                let closes = closes_cb.clone();
                async move {
                    closes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

        let ctx = ScopedContext::new();
        let upgrade = ws.try_upgrade(&upgrade_request("/chat")).unwrap();
        ws.dispatch_open(&upgrade.connection, &ctx).await;

        ws.dispatch_close(&upgrade.connection, &ctx).await;
        ws.dispatch_close(&upgrade.connection, &ctx).await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_message_dispatch_and_echo() {
        let ws = WebSocketServer::new();
        ws.register(
            "/echo",
            WsHandlerBundle::new().on_message(|conn, _ctx, msg| async move {
                if let WsMessage::Text(text) = msg {
                    conn.send_text(format!("echo: {text}"));
                }
                Ok(())
            }),
        )
        .unwrap();

        let ctx = ScopedContext::new();
        let upgrade = ws.try_upgrade(&upgrade_request("/echo")).unwrap();
        ws.dispatch_open(&upgrade.connection, &ctx).await;
        ws.dispatch_message(
            &upgrade.connection,
            &ctx,
            WsMessage::Text("hi".to_string()),
        )
        .await;

        assert_eq!(
            upgrade.connection.take_outbox(),
            vec![WsMessage::Text("echo: hi".to_string())]
        );
    }

    #[tokio::test]
    async fn test_message_after_close_dropped() {
        use std::sync::atomic::AtomicUsize;

        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_cb = delivered.clone();

        let ws = WebSocketServer::new();
        ws.register(
            "/chat",
            WsHandlerBundle::new().on_message(move |_conn, _ctx, _msg| {
                let delivered = delivered_cb.clone();
                async move {
                    delivered.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

        let ctx = ScopedContext::new();
        let upgrade = ws.try_upgrade(&upgrade_request("/chat")).unwrap();
        ws.dispatch_open(&upgrade.connection, &ctx).await;
        ws.dispatch_close(&upgrade.connection, &ctx).await;

        ws.dispatch_message(
            &upgrade.connection,
            &ctx,
            WsMessage::Text("late".to_string()),
        )
        .await;
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_error_does_not_close_connection() {
        let ws = WebSocketServer::new();
        ws.register(
            "/chat",
            WsHandlerBundle::new().on_message(|_conn, _ctx, _msg| async move {
                Err(Error::Handler("boom".to_string()))
            }),
        )
        .unwrap();

        let ctx = ScopedContext::new();
        let upgrade = ws.try_upgrade(&upgrade_request("/chat")).unwrap();
        ws.dispatch_open(&upgrade.connection, &ctx).await;
        ws.dispatch_message(
            &upgrade.connection,
            &ctx,
            WsMessage::Text("hi".to_string()),
        )
        .await;

        assert!(!upgrade.connection.is_closed());
    }

    #[test]
    fn test_session_update_bumps_timestamp_and_is_idempotent_on_remove() {
        let sessions = SessionManager::new();
        let session = sessions.create();

        assert!(sessions.update(&session.id, "user", serde_json::json!("alice")));
        let updated = sessions.get(&session.id).unwrap();
        assert_eq!(updated.data.get("user"), Some(&serde_json::json!("alice")));
        assert!(updated.updated_at >= session.updated_at);

        assert!(sessions.remove(&session.id));
        assert!(!sessions.remove(&session.id));
        assert!(!sessions.update(&session.id, "user", serde_json::json!("bob")));
    }
}
