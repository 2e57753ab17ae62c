//! The response accumulated while a request travels through the chain.

use serde::Serialize;
use serde_json::{Value, json};

use crate::request::Header;

/// Response value shared by all protocol adapters.
///
/// Middleware and handlers mutate it in place through
/// [`Context::response_mut`](crate::Context::response_mut); the engine hands
/// the final value back to the adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    status: u16,
    headers: Header,
    body: Option<Value>,
    specials: Vec<String>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    /// An empty `200` response.
    pub fn new() -> Self {
        Self {
            status: 200,
            headers: Header::new(),
            body: None,
            specials: Vec::new(),
        }
    }

    /// An error-shaped response: `{"code": status, "message": message}`.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        let mut response = Self::new();
        response.status = status;
        response.body = Some(json!({ "code": status, "message": message.into() }));
        response
    }

    /// Status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Sets the status code.
    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Response headers.
    pub fn headers(&self) -> &Header {
        &self.headers
    }

    /// Looks up one header.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Sets a header, replacing an existing value.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Response body, if one was written.
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Writes the body, replacing any previous one.
    pub fn write(&mut self, body: impl Into<Value>) {
        self.body = Some(body.into());
    }

    /// Returns `true` once a body has been written.
    pub fn is_written(&self) -> bool {
        self.body.is_some()
    }

    /// Message of an error-shaped body.
    pub fn error_message(&self) -> Option<&str> {
        self.body.as_ref()?.get("message")?.as_str()
    }

    /// Tags the response for special handling by adapters (e.g. `trace`).
    pub fn add_special(&mut self, special: impl Into<String>) {
        let special = special.into();
        if !self.specials.contains(&special) {
            self.specials.push(special);
        }
    }

    /// Tags added with [`add_special`](Self::add_special).
    pub fn specials(&self) -> &[String] {
        &self.specials
    }

    /// Consumes the response, returning the body.
    pub fn into_body(self) -> Option<Value> {
        self.body
    }
}
