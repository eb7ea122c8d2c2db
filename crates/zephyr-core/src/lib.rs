//! zephyr-core: Request-dispatch core for the zephyr web runtime
//!
//! Orchestrates the path of an inbound request: WebSocket upgrade attempt,
//! route matching against the ordered collection in `zephyr-router`, scoped
//! service resolution, the middleware chain with its single-use
//! continuation, and wire finalization. Transport concerns (sockets, HTTP
//! parsing, TLS) live outside this crate; it consumes [`RawRequest`] and
//! produces [`WireResponse`].

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod body;
pub mod context;
pub mod cookie;
pub mod error;
mod id;
pub mod middleware;
pub mod request;
pub mod response;
pub mod routing;
pub mod server;
pub mod telemetry;
pub mod ws;

// Re-exports
pub use error::{Error, ErrorEnvelope, Result};
pub use zephyr_router::{Matched, Method, ModuleTag, PathPattern, Route, RouteCollection};

pub use body::{BodyLimits, MultipartForm, ParsedBody, UploadedFile};
pub use context::{keys, ScopedContext, Service};
pub use cookie::{Cookie, SameSite};
pub use middleware::{
    handler_fn, middleware_fn, BoxFuture, Dispatcher, Exchange, Handler, Middleware, Next,
    MAX_CHAIN_DEPTH,
};
pub use request::{HttpRequest, RawRequest};
pub use response::{EndHook, HttpResponse, Payload, StatusCode, WireResponse};
pub use routing::{GroupOptions, RouteHit, RouteTarget, Router};
pub use server::{ConnectionTracker, Dispatched, HttpServer, ServerConfig};
pub use telemetry::init_telemetry;
pub use ws::{
    SessionManager, WebSocketServer, WsConnection, WsHandlerBundle, WsMessage, WsSession,
    WsUpgrade,
};
