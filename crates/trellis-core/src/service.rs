//! Tower integration.
//!
//! [`EngineService`] exposes an [`Engine`] as a `tower::Service<BoxedRequest>`
//! so transport adapters can stack tower layers (timeouts, concurrency
//! limits, buffering) in front of dispatch. Dispatch failures are already
//! folded into error-shaped responses, so the service itself never fails.

use std::convert::Infallible;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tower::Service;
use tower::util::BoxCloneSyncService;

use crate::engine::Engine;
use crate::request::BoxedRequest;
use crate::response::Response;

/// A type-erased, cloneable engine service.
pub type BoxedEngineService = BoxCloneSyncService<BoxedRequest, Response, Infallible>;

/// `tower::Service` adapter over an [`Engine`].
#[derive(Clone, Debug)]
pub struct EngineService {
    engine: Engine,
}

impl EngineService {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Erases the service type.
    pub fn boxed(self) -> BoxedEngineService {
        BoxCloneSyncService::new(self)
    }
}

impl Service<BoxedRequest> for EngineService {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: BoxedRequest) -> Self::Future {
        let engine = self.engine.clone();
        Box::pin(async move { Ok(engine.serve(request).await) })
    }
}

impl Engine {
    /// Wraps the engine as a tower service. The service shares this engine's
    /// route table.
    pub fn into_service(self) -> EngineService {
        EngineService::new(self)
    }
}
