//! # Trellis
//!
//! A multi-protocol service runtime. HTTP APIs, RPC calls, queue messages
//! and scheduled jobs all travel the same path:
//!
//! ```text
//! ┌───────────┐     ┌──────────────────┐     ┌────────────────────────┐
//! │ transport │────▶│ server (api/rpc/ │────▶│ engine                 │
//! │           │     │ mqc/cron)        │     │  global middleware     │
//! └───────────┘     └──────────────────┘     │  route middleware      │──▶ handler
//!                                            └────────────────────────┘
//! ```
//!
//! - **Engine**: per-method priority pattern matching (`/order/*`,
//!   `/report/**`) and the middleware chain
//! - **Servers**: API, RPC, queue consumer and time-wheel cron, each with
//!   its own engine
//! - **Runtime**: configuration, logging, reload and shutdown
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> trellis::runtime::RuntimeResult<()> {
//!     let runtime = Runtime::builder()
//!         .service("/order/query", handler_fn(|req: BoxedRequest| async move {
//!             Ok::<_, ServiceError>(serde_json::json!({ "order": req.service() }))
//!         }))
//!         .build()?;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use trellis_core as core;
pub use trellis_cron as cron;
pub use trellis_runtime as runtime;

pub use async_trait::async_trait;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use trellis::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use trellis_runtime::{Runtime, RuntimeBuilder, TrellisConfig};

    // Servers
    pub use trellis_runtime::{CronServer, MqcServer, QueueMessage, RouterServer, ServerKind};

    // Handlers and middleware
    pub use trellis_core::{
        BoxedHandler, BoxedMiddleware, BoxedRequest, Context, Handler, HandlerResult, Middleware,
        RawRequest, Request, Response, ServiceError, Services, handler_fn, middleware_fn,
    };

    // Routing
    pub use trellis_core::{Engine, PathMatcher, RouteEntry};

    // Scheduling
    pub use trellis_cron::{Processor, Task};

    pub use async_trait::async_trait;
}
