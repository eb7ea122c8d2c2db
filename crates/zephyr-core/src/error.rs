//! Error types for zephyr-core

use serde::Serialize;
use thiserror::Error;

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the request-dispatch core
///
/// Every variant maps to a well-formed HTTP status via [`Error::status`];
/// nothing escapes to the transport layer as a raw failure.
#[derive(Debug, Error)]
pub enum Error {
    /// No route accepts method + path
    #[error("route not found: {method} {path}")]
    RouteNotFound { method: String, path: String },

    /// Chain completed without setting a response body (handler bug)
    #[error("chain completed without a response body")]
    EmptyResponse,

    /// Request body exceeds the configured limit
    #[error("request body too large: {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { size: usize, limit: usize },

    /// One multipart upload exceeds the per-file limit
    #[error("uploaded file '{name}' too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge {
        name: String,
        size: usize,
        limit: usize,
    },

    /// Multipart upload count exceeds the limit
    #[error("too many uploaded files: {count} exceeds limit of {limit}")]
    TooManyFiles { count: usize, limit: usize },

    /// Body could not be parsed under its declared content type
    #[error("body parse error: {0}")]
    BodyParse(String),

    /// A middleware invoked its continuation a second time
    #[error("continuation invoked twice within one middleware")]
    NextInvokedTwice,

    /// Middleware chain exceeds the hard ceiling
    #[error("middleware chain too deep: {depth} exceeds ceiling of {limit}")]
    ChainTooDeep { depth: usize, limit: usize },

    /// A write-once request slot was written twice
    #[error("request slot '{0}' already set")]
    SlotOccupied(&'static str),

    /// Duplicate WebSocket registration for the same normalized path
    #[error("duplicate websocket route: {0}")]
    DuplicateWsRoute(String),

    /// Error raised by middleware, handler, or on-end hook
    #[error("handler error: {0}")]
    Handler(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error finalizes as
    pub fn status(&self) -> u16 {
        match self {
            Error::RouteNotFound { .. } | Error::EmptyResponse => 404,
            Error::BodyTooLarge { .. }
            | Error::FileTooLarge { .. }
            | Error::TooManyFiles { .. }
            | Error::BodyParse(_) => 400,
            Error::NextInvokedTwice
            | Error::ChainTooDeep { .. }
            | Error::SlotOccupied(_)
            | Error::DuplicateWsRoute(_)
            | Error::Handler(_)
            | Error::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for the JSON error envelope
    pub fn code(&self) -> &'static str {
        match self {
            Error::RouteNotFound { .. } => "ROUTE_NOT_FOUND",
            Error::EmptyResponse => "EMPTY_RESPONSE",
            Error::BodyTooLarge { .. } => "REQUEST_TOO_LARGE",
            Error::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Error::TooManyFiles { .. } => "TOO_MANY_FILES",
            Error::BodyParse(_) => "BODY_PARSE",
            Error::NextInvokedTwice | Error::ChainTooDeep { .. } => "MIDDLEWARE_PROTOCOL",
            Error::SlotOccupied(_) => "SLOT_OCCUPIED",
            Error::DuplicateWsRoute(_) => "DUPLICATE_WS_ROUTE",
            Error::Handler(_) => "HANDLER_ERROR",
            Error::Internal(_) => "INTERNAL",
        }
    }

    /// Fatal programming errors in the middleware protocol itself
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::NextInvokedTwice | Error::ChainTooDeep { .. })
    }
}

/// Wire-level `{code, message}` envelope for structured failures
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn from_error(err: &Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Serialize, falling back to a hand-built envelope if encoding fails
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| format!(r#"{{"code":"{}","message":""}}"#, self.code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::RouteNotFound {
                method: "GET".to_string(),
                path: "/x".to_string()
            }
            .status(),
            404
        );
        assert_eq!(Error::EmptyResponse.status(), 404);
        assert_eq!(Error::BodyTooLarge { size: 10, limit: 5 }.status(), 400);
        assert_eq!(Error::NextInvokedTwice.status(), 500);
        assert_eq!(Error::Handler("boom".to_string()).status(), 500);
    }

    #[test]
    fn test_body_too_large_names_both_sizes() {
        let err = Error::BodyTooLarge {
            size: 2048,
            limit: 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("2048"));
        assert!(msg.contains("1024"));
    }

    #[test]
    fn test_envelope_json() {
        let err = Error::BodyParse("bad json".to_string());
        let envelope = ErrorEnvelope::from_error(&err);
        let json = envelope.to_json();
        assert!(json.contains(r#""code":"BODY_PARSE""#));
        assert!(json.contains("bad json"));
    }

    #[test]
    fn test_protocol_violation() {
        assert!(Error::NextInvokedTwice.is_protocol_violation());
        assert!(Error::ChainTooDeep { depth: 51, limit: 50 }.is_protocol_violation());
        assert!(!Error::EmptyResponse.is_protocol_violation());
    }
}
