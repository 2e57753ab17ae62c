//! Per-request middleware context.
//!
//! One [`Context`] is created for every dispatched request and dropped when
//! the chain finishes. It is never shared between requests: middleware and
//! handlers receive it as `&mut Context` and everything request-scoped lives
//! here, including the typed state map used to hand values from middleware to
//! handlers.
//!
//! # Chain cursor
//!
//! The context owns the resolved middleware chain and an index into it.
//! [`Context::next`] runs the next middleware, or the route's handler once
//! the middleware are exhausted. A middleware that returns without calling
//! `next` ends the chain; code after `next().await` runs once the rest of
//! the chain has completed.
//!
//! ```rust,ignore
//! #[async_trait]
//! impl Middleware for Timing {
//!     async fn handle(&self, ctx: &mut Context) {
//!         let start = Instant::now();
//!         ctx.next().await;
//!         ctx.response_mut().set_header("X-Elapsed", format!("{:?}", start.elapsed()));
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::trace;

use crate::engine::RouteEntry;
use crate::error::ServiceError;
use crate::middleware::BoxedMiddleware;
use crate::request::BoxedRequest;
use crate::response::Response;

/// The state threaded through one request's middleware chain.
pub struct Context {
    request: BoxedRequest,
    response: Response,
    route: Arc<RouteEntry>,
    chain: Arc<[BoxedMiddleware]>,
    index: usize,
    aborted: bool,
    error: Option<ServiceError>,
    state: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Context {
    pub(crate) fn new(
        request: BoxedRequest,
        route: Arc<RouteEntry>,
        chain: Arc<[BoxedMiddleware]>,
    ) -> Self {
        Self {
            request,
            response: Response::new(),
            route,
            chain,
            index: 0,
            aborted: false,
            error: None,
            state: HashMap::new(),
        }
    }

    /// The inbound request.
    pub fn request(&self) -> &BoxedRequest {
        &self.request
    }

    /// The response accumulated so far.
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Mutable access to the response.
    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// The route entry the request resolved to.
    pub fn route(&self) -> &RouteEntry {
        &self.route
    }

    /// Runs the rest of the chain.
    ///
    /// Does nothing once the chain was aborted or the handler already ran.
    pub fn next(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.aborted {
                return;
            }

            let index = self.index;
            self.index += 1;

            if let Some(middleware) = self.chain.get(index).cloned() {
                trace!(
                    middleware = middleware.name(),
                    index,
                    "Entering middleware"
                );
                middleware.handle(self).await;
            } else if index == self.chain.len() {
                let handler = Arc::clone(self.route.handler());
                if let Err(err) = handler.call(self).await {
                    self.abort(err);
                }
            }
        })
    }

    /// Aborts the chain with an application error.
    ///
    /// The response is replaced with the error-shaped response and later
    /// calls to [`next`](Self::next) return immediately.
    pub fn abort(&mut self, error: ServiceError) {
        self.response = Response::error(error.status, error.message.clone());
        self.aborted = true;
        self.error.get_or_insert(error);
    }

    /// Returns `true` once the chain has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// The first error that aborted the chain.
    pub fn error(&self) -> Option<&ServiceError> {
        self.error.as_ref()
    }

    pub(crate) fn into_parts(self) -> (Response, Option<ServiceError>) {
        (self.response, self.error)
    }

    /// Stores a request-scoped value. One value per type; later calls overwrite.
    pub fn set_state<T: Send + Sync + 'static>(&mut self, value: T) {
        self.state.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Borrows a request-scoped value.
    pub fn get_state<T: 'static>(&self) -> Option<&T> {
        self.state
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns `true` if a value of type `T` is stored.
    pub fn has_state<T: 'static>(&self) -> bool {
        self.state.contains_key(&TypeId::of::<T>())
    }

    /// Removes and returns a request-scoped value.
    pub fn take_state<T: 'static>(&mut self) -> Option<T> {
        self.state
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request", &self.request)
            .field("route", &self.route.pattern())
            .field("index", &self.index)
            .field("aborted", &self.aborted)
            .finish_non_exhaustive()
    }
}
