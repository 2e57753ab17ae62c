//! # Trellis Core
//!
//! The protocol-independent heart of the Trellis service runtime.
//!
//! This crate provides:
//! - [`PathMatcher`]: priority path-pattern matching, also used for IP lists
//! - [`Engine`]: the route table and middleware chain executor
//! - [`Context`]: per-request state threaded through middleware and handlers
//! - [`Services`]: the registry configuration resolves handler names against
//! - Built-in middleware (trace, ACLs, response headers, raw body)
//!
//! Transport adapters (HTTP, RPC, queues, the cron wheel) live elsewhere and
//! reach the engine through the [`Request`] trait.

pub mod context;
pub mod engine;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod pattern;
pub mod registry;
pub mod request;
pub mod response;
pub mod service;

pub use context::Context;
pub use engine::{Engine, RouteEntry};
pub use error::{DispatchError, DispatchResult, PatternError, ServiceError};
pub use handler::{BoxedHandler, Handler, HandlerFn, HandlerResult, IntoBody, handler_fn};
pub use middleware::{BoxedMiddleware, Middleware, middleware_fn};
pub use pattern::{IP_SEPARATOR, PATH_SEPARATOR, PathMatcher, Pattern};
pub use registry::Services;
pub use request::{BoxedRequest, CLIENT_IP_HEADER, Form, Header, RawRequest, Request};
pub use response::Response;
pub use service::{BoxedEngineService, EngineService};
