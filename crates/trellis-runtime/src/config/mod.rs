//! Configuration module for the Trellis runtime.
//!
//! Layered loading (defaults, files, `TRELLIS_*` environment variables) and
//! validation of the server, routing, ACL, cron and queue sections.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    AclConfig, CronConfig, IpRuleConfig, LogFormat, LogLevel, LogOutput, LoggingConfig,
    MqcConfig, QueueConfig, RouteConfig, RouterConfig, ServerConfig, SpanEventConfig,
    TrellisConfig,
};
pub use validation::validate_config;
