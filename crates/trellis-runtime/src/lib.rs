//! Trellis Runtime - configuration, logging and protocol servers.
//!
//! This crate provides:
//! - Layered configuration (`TrellisConfig`, `ConfigLoader`)
//! - Logging setup on `tracing-subscriber` (`LoggingBuilder`)
//! - Transport-agnostic servers: API, RPC, queue consumer and cron
//! - Runtime orchestration with reload and graceful shutdown (`Runtime`)
//!
//! ```ignore
//! use trellis_core::handler_fn;
//! use trellis_runtime::Runtime;
//!
//! #[tokio::main]
//! async fn main() -> trellis_runtime::RuntimeResult<()> {
//!     let runtime = Runtime::builder()
//!         .service("/order/query", handler_fn(query_order))
//!         .build()?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod servers;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, TrellisConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{Runtime, RuntimeBuilder};
pub use servers::{
    CronServer, MqcServer, QueueMessage, QueueRequest, RouterServer, ServerKind, build_middleware,
};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// Provides the logging macros along with the `Level` type.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
