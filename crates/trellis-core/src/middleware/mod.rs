//! Middleware stages and the built-in middleware set.
//!
//! A middleware receives the request's [`Context`] and decides whether the
//! chain continues by awaiting [`Context::next`]. Returning without calling
//! `next` short-circuits: the response accumulated so far is final.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;

mod acl;
mod body;
mod header;
mod trace;

pub use acl::{BlackList, IpRule, WhiteList};
pub use body::{Body, RAW_BODY_KEY, RawBody};
pub use header::ResponseHeaders;
pub use trace::Trace;

/// One stage of a route's middleware chain.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Runs the stage. Call `ctx.next().await` to continue the chain.
    async fn handle(&self, ctx: &mut Context);
}

/// A type-erased middleware.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Adapts an async closure into a [`Middleware`].
///
/// The closure returns a boxed future borrowing the context, which is what
/// lets it await `ctx.next()`:
///
/// ```rust,ignore
/// let tag = middleware_fn("tag", |ctx| Box::pin(async move {
///     ctx.next().await;
///     ctx.response_mut().set_header("X-Tag", "1");
/// }));
/// ```
pub fn middleware_fn<F>(name: impl Into<String>, f: F) -> BoxedMiddleware
where
    F: for<'a> Fn(&'a mut Context) -> futures::future::BoxFuture<'a, ()> + Send + Sync + 'static,
{
    Arc::new(MiddlewareFn {
        name: name.into(),
        f,
    })
}

struct MiddlewareFn<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> Middleware for MiddlewareFn<F>
where
    F: for<'a> Fn(&'a mut Context) -> futures::future::BoxFuture<'a, ()> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &mut Context) {
        (self.f)(ctx).await;
    }
}
