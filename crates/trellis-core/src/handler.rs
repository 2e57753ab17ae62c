//! Terminal handlers.
//!
//! A [`Handler`] sits at the end of a route's middleware chain. Most services
//! are plain async functions over the request, wrapped with [`handler_fn`]:
//!
//! ```rust,ignore
//! use trellis_core::{handler_fn, BoxedRequest, ServiceError};
//! use serde_json::json;
//!
//! let query = handler_fn(|req: BoxedRequest| async move {
//!     let id = req.form().get("id").cloned().ok_or_else(|| ServiceError::bad_request("missing id"))?;
//!     Ok::<_, ServiceError>(json!({ "id": id }))
//! });
//! ```
//!
//! Handlers that need the full [`Context`] (request-scoped state, response
//! headers) implement the trait directly.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::Context;
use crate::error::ServiceError;
use crate::request::BoxedRequest;

/// Result of running a handler.
pub type HandlerResult = Result<(), ServiceError>;

/// The terminal stage of a route.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles the request, writing into `ctx.response_mut()`.
    ///
    /// An `Err` aborts the chain and becomes an error-shaped response.
    async fn call(&self, ctx: &mut Context) -> HandlerResult;
}

/// A type-erased handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// Values a function handler may return as its response body.
pub trait IntoBody: Send {
    /// Converts into the body written to the response, if any.
    fn into_body(self) -> Option<Value>;
}

impl IntoBody for () {
    fn into_body(self) -> Option<Value> {
        None
    }
}

impl IntoBody for Value {
    fn into_body(self) -> Option<Value> {
        Some(self)
    }
}

impl IntoBody for String {
    fn into_body(self) -> Option<Value> {
        Some(Value::String(self))
    }
}

impl IntoBody for &'static str {
    fn into_body(self) -> Option<Value> {
        Some(Value::String(self.to_string()))
    }
}

impl<T: IntoBody> IntoBody for Option<T> {
    fn into_body(self) -> Option<Value> {
        self.and_then(IntoBody::into_body)
    }
}

/// Adapts an async function over the request into a [`Handler`].
pub struct HandlerFn<F, T> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> HandlerFn<F, T> {
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, T> Handler for HandlerFn<F, T>
where
    F: Fn(BoxedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
    T: IntoBody + 'static,
{
    async fn call(&self, ctx: &mut Context) -> HandlerResult {
        let request = Arc::clone(ctx.request());
        if let Some(body) = (self.f)(request).await?.into_body() {
            ctx.response_mut().write(body);
        }
        Ok(())
    }
}

/// Converts an async function into a [`BoxedHandler`].
pub fn handler_fn<F, Fut, T>(f: F) -> BoxedHandler
where
    F: Fn(BoxedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
    T: IntoBody + 'static,
{
    Arc::new(HandlerFn::new(f))
}
