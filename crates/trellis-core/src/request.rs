//! The request shape shared by every protocol adapter.
//!
//! HTTP, RPC, queue messages and scheduled jobs all reach the engine as a
//! [`BoxedRequest`]: something with a method, a service path, a header map
//! and a form map.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Header map carried by a request.
pub type Header = HashMap<String, String>;

/// Form/body parameters carried by a request.
pub type Form = Map<String, Value>;

/// Header holding the caller's address, filled in by transport adapters.
pub const CLIENT_IP_HEADER: &str = "X-Real-IP";

/// The minimal request contract the dispatch engine routes on.
pub trait Request: Send + Sync + fmt::Debug {
    /// Method name (`GET`, `POST`, ...). Matching is case-insensitive.
    fn method(&self) -> &str;

    /// Service path matched against the route table.
    fn service(&self) -> &str;

    /// Request headers.
    fn header(&self) -> &Header;

    /// Form/body parameters.
    fn form(&self) -> &Form;

    /// Display name used in logs; defaults to the service path.
    fn name(&self) -> &str {
        self.service()
    }

    /// Caller address, if the adapter provided one.
    fn client_ip(&self) -> Option<&str> {
        self.header().get(CLIENT_IP_HEADER).map(String::as_str)
    }
}

/// A type-erased, shareable request.
pub type BoxedRequest = Arc<dyn Request>;

/// A plain request value, built by HTTP/RPC adapters and tests.
///
/// ```rust
/// use trellis_core::{RawRequest, Request};
///
/// let req = RawRequest::new("post", "/order/pay")
///     .with_header("X-Request-Id", "abc")
///     .with_form("amount", 12);
/// assert_eq!(req.service(), "/order/pay");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    method: String,
    service: String,
    header: Header,
    form: Form,
}

impl RawRequest {
    /// Creates a request for `service` using `method`.
    pub fn new(method: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            service: service.into(),
            header: Header::new(),
            form: Form::new(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.insert(key.into(), value.into());
        self
    }

    /// Adds a form parameter.
    pub fn with_form(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.form.insert(key.into(), value.into());
        self
    }

    /// Replaces the whole form.
    pub fn with_form_map(mut self, form: Form) -> Self {
        self.form = form;
        self
    }

    /// Sets the caller address header.
    pub fn with_client_ip(self, ip: impl Into<String>) -> Self {
        self.with_header(CLIENT_IP_HEADER, ip)
    }

    /// Wraps the request for dispatch.
    pub fn boxed(self) -> BoxedRequest {
        Arc::new(self)
    }
}

impl Request for RawRequest {
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
}
