//! Configuration schema definitions.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trellis_cron::Task;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrellisConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Settings shared by every server.
    #[serde(default)]
    pub server: ServerConfig,

    /// HTTP API routes.
    #[serde(default)]
    pub api: RouterConfig,

    /// RPC routes.
    #[serde(default)]
    pub rpc: RouterConfig,

    /// IP access control.
    #[serde(default)]
    pub acl: AclConfig,

    /// Recurring jobs.
    #[serde(default)]
    pub cron: CronConfig,

    /// Queue consumers.
    #[serde(default)]
    pub mqc: MqcConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids in log lines.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line of the call site.
    #[serde(default)]
    pub file_location: bool,

    /// Log file, required when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_max_files")]
    pub max_files: u32,

    /// Per-module levels, e.g. `trellis_cron = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
            filters: HashMap::new(),
        }
    }
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_files() -> u32 {
    5
}

// =============================================================================
// Servers
// =============================================================================

/// Settings shared by every server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server name used in logs.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Log every request and response.
    #[serde(default)]
    pub trace: bool,

    /// Headers added to every response.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            trace: false,
            headers: BTreeMap::new(),
        }
    }
}

fn default_server_name() -> String {
    "trellis".to_string()
}

/// Routes of one router server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// One configured route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Path pattern, may contain `*` and `**`.
    pub path: String,

    /// Name of the registered service handling the route. Defaults to the
    /// path.
    #[serde(default)]
    pub service: String,

    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
}

impl RouteConfig {
    pub fn new(path: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            service: service.into(),
            methods: default_methods(),
        }
    }

    /// The effective service name.
    pub fn service(&self) -> &str {
        if self.service.is_empty() {
            &self.path
        } else {
            &self.service
        }
    }
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string(), "POST".to_string()]
}

/// IP access control lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AclConfig {
    /// Per-path allow rules.
    #[serde(default)]
    pub white_list: Vec<IpRuleConfig>,

    /// Addresses always rejected.
    #[serde(default)]
    pub black_list: Vec<String>,
}

/// One allow rule of the white list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpRuleConfig {
    /// Path patterns the rule governs.
    pub requests: Vec<String>,
    /// Address patterns allowed on those paths.
    pub ips: Vec<String>,
}

/// Time wheel and task configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// Slot span in milliseconds.
    #[serde(default = "default_span_ms")]
    pub span_ms: u64,

    /// Number of slots.
    #[serde(default = "default_length")]
    pub length: usize,

    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            span_ms: default_span_ms(),
            length: default_length(),
            tasks: Vec::new(),
        }
    }
}

impl CronConfig {
    pub fn span(&self) -> Duration {
        Duration::from_millis(self.span_ms)
    }
}

fn default_span_ms() -> u64 {
    1000
}

fn default_length() -> usize {
    60
}

/// Queue consumer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MqcConfig {
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
}

/// Binding of one queue to a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub queue: String,
    pub service: String,

    #[serde(default)]
    pub disable: bool,
}

impl QueueConfig {
    pub fn new(queue: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            service: service.into(),
            disable: false,
        }
    }
}
