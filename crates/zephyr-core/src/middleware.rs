//! Middleware dispatcher
//!
//! Runs an ordered middleware list plus a terminal handler via a single-use
//! continuation. The exchange (request + response + scoped context) is
//! passed by value through the chain and returned, so a middleware can act
//! before and after the downstream steps:
//!
//! ```
//! use zephyr_core::middleware::{middleware_fn, Exchange, Next};
//!
//! let timing = middleware_fn(|ex: Exchange, next: Next| async move {
//!     // before downstream
//!     let mut ex = next.run(ex).await?;
//!     // after downstream
//!     ex.response.add_header("x-traced", "1");
//!     Ok(ex)
//! });
//! # drop(timing);
//! ```
//!
//! Not calling `next` short-circuits the chain. Calling it a second time is
//! a protocol error, as is a chain deeper than [`MAX_CHAIN_DEPTH`].

use crate::context::ScopedContext;
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Hard ceiling on chain length (middleware + terminal handler)
pub const MAX_CHAIN_DEPTH: usize = 50;

/// Boxed future returned by middleware and handlers
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Per-request state threaded through the chain
pub struct Exchange {
    pub request: Arc<HttpRequest>,
    pub response: HttpResponse,
    pub context: ScopedContext,
}

impl Exchange {
    pub fn new(request: HttpRequest, context: ScopedContext) -> Self {
        Self {
            request: Arc::new(request),
            response: HttpResponse::new(),
            context,
        }
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Context bindings are type-erased and not Debug
        f.debug_struct("Exchange")
            .field("request", &self.request)
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

/// A middleware step: act on the exchange, optionally calling `next` once
pub type Middleware =
    Arc<dyn Fn(Exchange, Next) -> BoxFuture<Result<Exchange>> + Send + Sync>;

/// The terminal handler at the end of the chain
pub type Handler = Arc<dyn Fn(Exchange) -> BoxFuture<Result<Exchange>> + Send + Sync>;

/// Wrap an async closure as a [`Middleware`]
pub fn middleware_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(Exchange, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Exchange>> + Send + 'static,
{
    Arc::new(move |ex, next| Box::pin(f(ex, next)))
}

/// Wrap an async closure as a [`Handler`]
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Exchange) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Exchange>> + Send + 'static,
{
    Arc::new(move |ex| Box::pin(f(ex)))
}

struct Chain {
    middleware: Vec<Middleware>,
    handler: Handler,
}

/// Single-use continuation handed to each middleware
///
/// `run` advances to the next step (or the terminal handler). A second call
/// on the same continuation fails with [`Error::NextInvokedTwice`]; it is
/// never silently ignored.
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
    used: AtomicBool,
}

impl Next {
    fn step(chain: Arc<Chain>, index: usize) -> Self {
        Self {
            chain,
            index,
            used: AtomicBool::new(false),
        }
    }

    /// Invoke the next step in the chain
    pub async fn run(&self, exchange: Exchange) -> Result<Exchange> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(Error::NextInvokedTwice);
        }
        if self.index > MAX_CHAIN_DEPTH {
            return Err(Error::ChainTooDeep {
                depth: self.index,
                limit: MAX_CHAIN_DEPTH,
            });
        }

        match self.chain.middleware.get(self.index) {
            Some(mw) => {
                let next = Next::step(self.chain.clone(), self.index + 1);
                mw(exchange, next).await
            }
            None => (self.chain.handler)(exchange).await,
        }
    }
}

/// Dispatcher for one ordered middleware list plus terminal handler
pub struct Dispatcher {
    chain: Arc<Chain>,
}

impl Dispatcher {
    /// Build a dispatcher; chains longer than the ceiling are rejected
    /// before any step can run.
    pub fn new(middleware: Vec<Middleware>, handler: Handler) -> Result<Self> {
        let depth = middleware.len() + 1;
        if depth > MAX_CHAIN_DEPTH {
            return Err(Error::ChainTooDeep {
                depth,
                limit: MAX_CHAIN_DEPTH,
            });
        }
        Ok(Self {
            chain: Arc::new(Chain {
                middleware,
                handler,
            }),
        })
    }

    /// Run the chain to completion, strictly in registration order
    pub async fn run(&self, exchange: Exchange) -> Result<Exchange> {
        Next::step(self.chain.clone(), 0).run(exchange).await
    }
}
