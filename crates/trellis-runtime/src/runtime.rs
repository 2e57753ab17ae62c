//! Runtime orchestration.
//!
//! A [`Runtime`] owns one server per protocol, each with its own engine,
//! all resolving handlers against a shared [`Services`] registry.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use trellis_runtime::Runtime;
//!
//! let runtime = Runtime::builder()
//!     .config_file("trellis.toml")
//!     .service("/order/query", handler_fn(query_order))
//!     .build()?;
//!
//! // Transports feed requests into the servers
//! let response = runtime.api().serve(request).await;
//!
//! runtime.run().await?;
//! ```
//!
//! # Reloading
//!
//! [`Runtime::reload`] checks every section first, then swaps route tables
//! wholesale, re-syncs queue bindings and re-syncs scheduled tasks by name. Global middleware (trace, ACLs,
//! response headers) and wheel dimensions are fixed when the runtime is
//! built.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::signal;
use tracing::{error, info, warn};
use trellis_core::{BoxedHandler, Services};

use crate::config::{ConfigLoader, TrellisConfig, validate_config};
use crate::error::RuntimeResult;
use crate::logging;
use crate::servers::{CronServer, MqcServer, RouterServer, ServerKind};

/// The Trellis runtime.
pub struct Runtime {
    config: RwLock<TrellisConfig>,
    services: Services,
    api: RouterServer,
    rpc: RouterServer,
    mqc: MqcServer,
    cron: CronServer,
    running: AtomicBool,
}

impl Runtime {
    /// Creates a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration.
    ///
    /// Initializes logging (unless a subscriber is already installed) and
    /// builds every server. Fails if a configured route, queue or task names
    /// a service missing from `services`.
    pub fn from_config(config: &TrellisConfig, services: Services) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);
        validate_config(config)?;

        let server = &config.server;
        let acl = &config.acl;
        let api = RouterServer::from_config(
            ServerKind::Api,
            server,
            acl,
            &config.api,
            services.clone(),
        )?;
        let rpc = RouterServer::from_config(
            ServerKind::Rpc,
            server,
            acl,
            &config.rpc,
            services.clone(),
        )?;
        let mqc = MqcServer::from_config(server, acl, &config.mqc, services.clone())?;
        let cron = CronServer::from_config(server, acl, &config.cron, services.clone())?;

        info!(
            server = %server.name,
            log_level = %config.logging.level,
            services = services.len(),
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config: RwLock::new(config.clone()),
            services,
            api,
            rpc,
            mqc,
            cron,
            running: AtomicBool::new(false),
        })
    }

    /// A snapshot of the active configuration.
    pub fn config(&self) -> TrellisConfig {
        self.config.read().clone()
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn api(&self) -> &RouterServer {
        &self.api
    }

    pub fn rpc(&self) -> &RouterServer {
        &self.rpc
    }

    pub fn mqc(&self) -> &MqcServer {
        &self.mqc
    }

    pub fn cron(&self) -> &CronServer {
        &self.cron
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Applies a new configuration to the running servers.
    ///
    /// Every server checks its section first. If any check fails, no server
    /// changes and the active configuration is kept.
    pub fn reload(&self, config: TrellisConfig) -> RuntimeResult<()> {
        validate_config(&config)?;
        self.api.check(&config.api)?;
        self.rpc.check(&config.rpc)?;
        self.mqc.check(&config.mqc)?;
        self.cron.check(&config.cron)?;

        self.api.apply(&config.api)?;
        self.rpc.apply(&config.rpc)?;
        self.mqc.apply(&config.mqc)?;
        self.cron.apply(&config.cron)?;

        info!(
            api_routes = config.api.routes.len(),
            rpc_routes = config.rpc.routes.len(),
            queues = config.mqc.queues.len(),
            tasks = config.cron.tasks.len(),
            "Configuration reloaded"
        );
        *self.config.write() = config;
        Ok(())
    }

    /// Starts the scheduled task wheel.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Runtime is already running");
            return;
        }
        self.cron.start();
        info!(server = %self.config.read().server.name, "Runtime started");
    }

    /// Stops consumers and the wheel.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Runtime is not running");
        }
        self.mqc.close();
        self.cron.close().await;
        info!("Runtime stopped");
    }

    /// Runs until a shutdown signal is received.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start();
        info!("Trellis runtime is now running. Press Ctrl+C to stop.");
        wait_for_shutdown().await;
        self.shutdown().await;
        Ok(())
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start();
        shutdown.await;
        self.shutdown().await;
        Ok(())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("services", &self.services)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`Runtime`].
///
/// ```rust,ignore
/// let runtime = Runtime::builder()
///     .config_file("config/trellis.toml")
///     .profile("production")
///     .services(services)
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<TrellisConfig>,
    services: Services,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            config: None,
            services: Services::new(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration under files and environment.
    pub fn merge(mut self, config: TrellisConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `config` as is, skipping files and environment.
    pub fn config(mut self, config: TrellisConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses an existing service registry.
    pub fn services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// Registers one service.
    pub fn service(self, name: impl Into<String>, handler: BoxedHandler) -> Self {
        self.services.register(name, handler);
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> RuntimeResult<Runtime> {
        let config = match self.config {
            Some(config) => config,
            None => self.config_loader.load()?,
        };
        Runtime::from_config(&config, self.services)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
