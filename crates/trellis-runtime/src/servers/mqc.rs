//! Message queue consumer server.
//!
//! Each configured queue is bound to a service. Messages arriving on a queue
//! are decoded into a [`QueueRequest`] and dispatched with method `GET` to
//! the bound service path.
//!
//! # Message format
//!
//! A message must be a JSON object:
//!
//! ```json
//! { "__header__": { "X-Request-Id": "abc" }, "order_id": 42 }
//! ```
//!
//! Keys starting with `__` are reserved: `__header__` becomes the request
//! header and `__raw__`, when it is an object, replaces the form entirely.
//! The undecoded message is always kept under the `__body_` form key.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trellis_core::middleware::RAW_BODY_KEY;
use trellis_core::{Engine, Form, Header, PathMatcher, Request, Response, Services};

use crate::config::{AclConfig, MqcConfig, QueueConfig, ServerConfig};
use crate::error::{RuntimeError, RuntimeResult};

const DEFAULT_METHOD: &str = "GET";
const HEADER_KEY: &str = "__header__";
const RAW_KEY: &str = "__raw__";
const RESERVED_PREFIX: &str = "__";

/// A message received from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub queue: String,
    pub payload: String,
}

impl QueueMessage {
    pub fn new(queue: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            payload: payload.into(),
        }
    }
}

/// A queue message decoded into a dispatchable request.
#[derive(Debug, Clone)]
pub struct QueueRequest {
    queue: String,
    service: String,
    method: String,
    header: Header,
    form: Form,
}

impl QueueRequest {
    /// Decodes `message` received on `queue`.
    pub fn from_message(queue: &str, service: &str, message: &str) -> RuntimeResult<Self> {
        let input = match serde_json::from_str::<Value>(message) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(RuntimeError::invalid_message(queue, "not a JSON object")),
            Err(e) => return Err(RuntimeError::invalid_message(queue, e)),
        };

        let mut header = Header::new();
        if let Some(Value::Object(values)) = input.get(HEADER_KEY) {
            for (key, value) in values {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                header.insert(key.clone(), value);
            }
        }

        let mut form = match input.get(RAW_KEY) {
            Some(Value::Object(raw)) => raw.clone(),
            _ => input
                .iter()
                .filter(|(key, _)| !key.starts_with(RESERVED_PREFIX))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        };
        form.insert(RAW_BODY_KEY.to_string(), Value::String(message.to_string()));

        Ok(Self {
            queue: queue.to_string(),
            service: service.to_string(),
            method: DEFAULT_METHOD.to_string(),
            header,
            form,
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

impl Request for QueueRequest {
    fn method(&self) -> &str {
        &self.method
    }

    fn service(&self) -> &str {
        &self.service
    }

    fn header(&self) -> &Header {
        &self.header
    }

    fn form(&self) -> &Form {
        &self.form
    }

    fn name(&self) -> &str {
        &self.queue
    }
}

/// Dispatches queue messages to their bound services. Clones share state.
#[derive(Debug, Clone)]
pub struct MqcServer {
    engine: Engine,
    services: Services,
    bindings: Arc<RwLock<HashMap<String, QueueConfig>>>,
    shutdown: CancellationToken,
}

impl MqcServer {
    /// Builds the server and binds the configured queues.
    pub fn from_config(
        server: &ServerConfig,
        acl: &AclConfig,
        mqc: &MqcConfig,
        services: Services,
    ) -> RuntimeResult<Self> {
        let this = Self {
            engine: super::build_engine(server, acl)?,
            services,
            bindings: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        };
        this.apply(mqc)?;
        Ok(this)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Binds a queue to its service. Disabled bindings are skipped and
    /// rebinding a queue replaces the previous binding.
    pub fn add(&self, binding: QueueConfig) -> RuntimeResult<()> {
        if binding.disable {
            debug!(queue = %binding.queue, "Skipping disabled queue");
            return Ok(());
        }
        let entry = self
            .services
            .route(DEFAULT_METHOD, &binding.service, &binding.service)?;
        self.engine.route(entry)?;

        let previous = self
            .bindings
            .write()
            .insert(binding.queue.clone(), binding.clone());
        if let Some(previous) = previous
            && previous.service != binding.service
        {
            self.release_route(&previous.service);
        }
        info!(queue = %binding.queue, service = %binding.service, "Queue bound");
        Ok(())
    }

    /// Unbinds a queue. Returns `false` if it was not bound.
    pub fn remove(&self, queue: &str) -> bool {
        let Some(binding) = self.bindings.write().remove(queue) else {
            return false;
        };
        self.release_route(&binding.service);
        info!(queue, "Queue unbound");
        true
    }

    /// Drops the route for `service` unless another queue still uses it.
    fn release_route(&self, service: &str) {
        let in_use = self
            .bindings
            .read()
            .values()
            .any(|binding| binding.service == service);
        if !in_use {
            self.engine.unregister(DEFAULT_METHOD, service);
        }
    }

    /// Brings the bindings in line with `mqc`.
    ///
    /// All services are checked before anything changes, so an unknown
    /// service leaves the current bindings in place.
    pub fn apply(&self, mqc: &MqcConfig) -> RuntimeResult<()> {
        self.check(mqc)?;
        let wanted: Vec<&QueueConfig> = mqc.queues.iter().filter(|q| !q.disable).collect();

        let stale: Vec<String> = self
            .bindings
            .read()
            .keys()
            .filter(|queue| !wanted.iter().any(|b| &b.queue == *queue))
            .cloned()
            .collect();
        for queue in stale {
            self.remove(&queue);
        }
        for binding in wanted {
            self.add(binding.clone())?;
        }
        Ok(())
    }

    /// Checks that every enabled binding in `mqc` names a known service.
    pub fn check(&self, mqc: &MqcConfig) -> RuntimeResult<()> {
        let wanted: Vec<&QueueConfig> = mqc.queues.iter().filter(|q| !q.disable).collect();
        for binding in &wanted {
            self.services.get(&binding.service)?;
        }
        PathMatcher::paths(wanted.iter().map(|binding| binding.service.as_str()))?;
        Ok(())
    }

    /// Bound queue names, sorted.
    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<_> = self.bindings.read().keys().cloned().collect();
        queues.sort();
        queues
    }

    pub fn is_bound(&self, queue: &str) -> bool {
        self.bindings.read().contains_key(queue)
    }

    /// Decodes and dispatches one message.
    pub async fn dispatch(&self, queue: &str, message: &str) -> RuntimeResult<Response> {
        if self.shutdown.is_cancelled() {
            return Err(RuntimeError::Closed);
        }
        let service = self
            .bindings
            .read()
            .get(queue)
            .map(|binding| binding.service.clone())
            .ok_or_else(|| RuntimeError::UnknownQueue(queue.to_string()))?;

        let request = QueueRequest::from_message(queue, &service, message)?;
        Ok(self.engine.handle_request(Arc::new(request)).await?)
    }

    /// Consumes messages until the channel closes or the server is closed.
    /// Each message is dispatched on its own task.
    pub fn consume(&self, mut receiver: mpsc::Receiver<QueueMessage>) -> JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = server.shutdown.cancelled() => break,
                    message = receiver.recv() => {
                        let Some(message) = message else { break };
                        let server = server.clone();
                        tokio::spawn(async move {
                            match server.dispatch(&message.queue, &message.payload).await {
                                Ok(response) => {
                                    debug!(queue = %message.queue, status = response.status(), "Message handled");
                                }
                                Err(e) => {
                                    warn!(queue = %message.queue, error = %e, "Message failed");
                                }
                            }
                        });
                    }
                }
            }
            debug!("Queue consumer stopped");
        })
    }

    /// Stops consumers and rejects further messages. Idempotent.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            self.shutdown.cancel();
            info!("Queue server closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
