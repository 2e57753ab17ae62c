//! Error types for the Trellis core.

use thiserror::Error;

use crate::response::Response;

/// Errors raised while building a pattern set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// The pattern string was empty.
    #[error("empty pattern")]
    Empty,

    /// A `**` token appeared before the last position.
    #[error("multi-segment wildcard must be the last token: '{pattern}'")]
    MisplacedMultiWildcard {
        /// The offending pattern.
        pattern: String,
    },
}

/// An application-level failure raised by a handler or middleware.
///
/// Carries the status code and message that end up in the error-shaped
/// response returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{status}] {message}")]
pub struct ServiceError {
    /// Status code (HTTP semantics, also used by the RPC/queue/cron adapters).
    pub status: u16,
    /// Human readable message.
    pub message: String,
}

impl ServiceError {
    /// Creates an error with an explicit status code.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 400 Bad Request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    /// 401 Unauthorized.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, message)
    }

    /// 403 Forbidden.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, message)
    }

    /// 404 Not Found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    /// 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(err.to_string())
    }
}

/// Errors produced by the dispatch engine.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// No registered pattern matched the request.
    #[error("no route for {method} {service}")]
    RouteNotFound {
        /// Request method (upper case).
        method: String,
        /// Request service path.
        service: String,
    },

    /// A route was registered with a malformed pattern.
    #[error("invalid route pattern: {0}")]
    InvalidPattern(#[from] PatternError),

    /// A handler or middleware aborted the chain.
    #[error("handler failed: {0}")]
    Handler(ServiceError),

    /// No handler is registered under the given service name.
    #[error("no handler registered for service '{0}'")]
    UnknownService(String),

    /// An unexpected condition, such as a panicking handler.
    #[error("internal fault: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Status code used for the error-shaped response.
    pub fn status(&self) -> u16 {
        match self {
            Self::RouteNotFound { .. } | Self::UnknownService(_) => 404,
            Self::Handler(err) => err.status,
            Self::InvalidPattern(_) | Self::Internal(_) => 500,
        }
    }

    /// Converts the error into the structured response handed back to callers.
    pub fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::Handler(err) => err.message,
            other => other.to_string(),
        };
        Response::error(status, message)
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_keeps_status_and_message() {
        let response = DispatchError::Handler(ServiceError::forbidden("ip denied")).into_response();
        assert_eq!(response.status(), 403);
        assert_eq!(response.error_message(), Some("ip denied"));
    }

    #[test]
    fn route_not_found_maps_to_404() {
        let err = DispatchError::RouteNotFound {
            method: "GET".into(),
            service: "/missing".into(),
        };
        assert_eq!(err.status(), 404);
        assert_eq!(err.to_string(), "no route for GET /missing");
    }
}
