//! The dispatch engine.
//!
//! An [`Engine`] owns the route table: one [`PathMatcher`] per method plus the
//! [`RouteEntry`] bound to every pattern. Protocol adapters hand it a
//! [`BoxedRequest`]; the engine resolves the request's method and service
//! path, builds a [`Context`] and runs global middleware, route middleware
//! and finally the route's handler.
//!
//! # Concurrency
//!
//! The table is an immutable snapshot behind an [`ArcSwap`]. Lookups load the
//! current snapshot without locking; writers serialize on a mutex, copy the
//! snapshot, modify the copy and publish it. A request keeps the snapshot it
//! started with, so [`Engine::replace_routes`] never disturbs in-flight work.
//!
//! ```rust,ignore
//! let engine = Engine::new();
//! engine.use_middleware(Arc::new(Trace));
//! engine.handle("GET", "/order/*", handler_fn(|req| async move {
//!     Ok::<_, ServiceError>(json!({ "order": req.service() }))
//! }))?;
//!
//! let response = engine.serve(RawRequest::new("GET", "/order/42").boxed()).await;
//! ```

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{Instrument, Level, debug, error, span};

use crate::context::Context;
use crate::error::{DispatchError, DispatchResult, ServiceError};
use crate::handler::BoxedHandler;
use crate::middleware::BoxedMiddleware;
use crate::pattern::PathMatcher;
use crate::request::BoxedRequest;
use crate::response::Response;

/// One registered (method, pattern, handler) binding.
#[derive(Clone)]
pub struct RouteEntry {
    method: String,
    pattern: String,
    handler: BoxedHandler,
    middleware: Vec<BoxedMiddleware>,
}

impl RouteEntry {
    /// Creates an entry. The method is normalized to upper case.
    pub fn new(
        method: impl AsRef<str>,
        pattern: impl Into<String>,
        handler: BoxedHandler,
    ) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            pattern: pattern.into(),
            handler,
            middleware: Vec::new(),
        }
    }

    /// Appends route-specific middleware, run after the global middleware.
    pub fn with_middleware(mut self, middleware: BoxedMiddleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }

    pub fn middleware(&self) -> &[BoxedMiddleware] {
        &self.middleware
    }
}

impl std::fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("middleware_count", &self.middleware.len())
            .finish()
    }
}

#[derive(Clone, Default)]
struct MethodRoutes {
    matcher: PathMatcher,
    entries: HashMap<String, Arc<RouteEntry>>,
}

impl MethodRoutes {
    fn resolve(&self, service: &str) -> Option<&Arc<RouteEntry>> {
        self.matcher
            .find(service)
            .and_then(|pattern| self.entries.get(pattern))
    }
}

#[derive(Clone, Default)]
struct RouteTable {
    global: Vec<BoxedMiddleware>,
    methods: HashMap<String, MethodRoutes>,
}

impl RouteTable {
    fn insert(&mut self, entry: RouteEntry) -> DispatchResult<()> {
        let routes = self.methods.entry(entry.method.clone()).or_default();
        if !routes.matcher.insert(&entry.pattern)? {
            debug!(
                method = %entry.method,
                pattern = %entry.pattern,
                "Route already registered, replacing handler"
            );
        }
        routes.entries.insert(entry.pattern.clone(), Arc::new(entry));
        Ok(())
    }

    fn route_count(&self) -> usize {
        self.methods.values().map(|r| r.entries.len()).sum()
    }
}

struct Inner {
    table: ArcSwap<RouteTable>,
    writer: Mutex<()>,
}

/// Route table plus middleware chain executor.
///
/// Cloning is cheap: all clones share one table.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine with an empty route table.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                table: ArcSwap::from_pointee(RouteTable::default()),
                writer: Mutex::new(()),
            }),
        }
    }

    fn update<T>(&self, f: impl FnOnce(&mut RouteTable) -> DispatchResult<T>) -> DispatchResult<T> {
        let _guard = self.inner.writer.lock();
        let mut table = RouteTable::clone(&self.inner.table.load());
        let out = f(&mut table)?;
        self.inner.table.store(Arc::new(table));
        Ok(out)
    }

    /// Appends middleware that runs before every route's own middleware.
    pub fn use_middleware(&self, middleware: BoxedMiddleware) {
        let _guard = self.inner.writer.lock();
        let mut table = RouteTable::clone(&self.inner.table.load());
        table.global.push(middleware);
        self.inner.table.store(Arc::new(table));
    }

    /// Registers `handler` for `method` and `pattern`.
    ///
    /// Registering the same (method, pattern) again replaces the handler.
    pub fn handle(
        &self,
        method: impl AsRef<str>,
        pattern: impl Into<String>,
        handler: BoxedHandler,
    ) -> DispatchResult<()> {
        self.route(RouteEntry::new(method, pattern, handler))
    }

    /// Registers a fully built route entry.
    pub fn route(&self, entry: RouteEntry) -> DispatchResult<()> {
        self.update(|table| table.insert(entry))
    }

    /// Removes one route. Returns `false` if it was not registered.
    pub fn unregister(&self, method: impl AsRef<str>, pattern: &str) -> bool {
        let method = method.as_ref().to_ascii_uppercase();
        self.update(|table| {
            let Some(routes) = table.methods.get_mut(&method) else {
                return Ok(false);
            };
            routes.entries.remove(pattern);
            let removed = routes.matcher.remove(pattern);
            if routes.entries.is_empty() {
                table.methods.remove(&method);
            }
            Ok(removed)
        })
        .unwrap_or(false)
    }

    /// Swaps the whole route table for `routes`.
    ///
    /// Global middleware is kept. If any entry carries a malformed pattern
    /// the current table stays in place.
    pub fn replace_routes<I>(&self, routes: I) -> DispatchResult<()>
    where
        I: IntoIterator<Item = RouteEntry>,
    {
        self.update(|table| {
            let mut fresh = RouteTable {
                global: table.global.clone(),
                methods: HashMap::new(),
            };
            for entry in routes {
                fresh.insert(entry)?;
            }
            debug!(routes = fresh.route_count(), "Route table replaced");
            *table = fresh;
            Ok(())
        })
    }

    /// Returns `true` if any pattern under any method matches `path`.
    pub fn find(&self, path: &str) -> bool {
        self.inner
            .table
            .load()
            .methods
            .values()
            .any(|routes| routes.matcher.is_match(path))
    }

    /// Resolves a method and service path to its route entry.
    pub fn resolve(&self, method: &str, service: &str) -> DispatchResult<Arc<RouteEntry>> {
        let method = method.to_ascii_uppercase();
        self.inner
            .table
            .load()
            .methods
            .get(&method)
            .and_then(|routes| routes.resolve(service))
            .cloned()
            .ok_or_else(|| DispatchError::RouteNotFound {
                method,
                service: service.to_string(),
            })
    }

    /// Number of registered routes across all methods.
    pub fn route_count(&self) -> usize {
        self.inner.table.load().route_count()
    }

    /// Runs `request` through its route's chain.
    ///
    /// Returns the accumulated response, including responses produced by a
    /// middleware that short-circuited. A chain aborted by a handler or
    /// middleware error yields [`DispatchError::Handler`]; a panicking stage
    /// yields [`DispatchError::Internal`].
    pub async fn handle_request(&self, request: BoxedRequest) -> DispatchResult<Response> {
        match self.run(request).await? {
            (_, Some(err)) => Err(DispatchError::Handler(err)),
            (response, None) => Ok(response),
        }
    }

    /// Runs the chain, returning the final response and the error that
    /// aborted it, if any.
    async fn run(&self, request: BoxedRequest) -> DispatchResult<(Response, Option<ServiceError>)> {
        let table = self.inner.table.load_full();
        let method = request.method().to_ascii_uppercase();
        let route = table
            .methods
            .get(&method)
            .and_then(|routes| routes.resolve(request.service()))
            .cloned()
            .ok_or_else(|| DispatchError::RouteNotFound {
                method: method.clone(),
                service: request.service().to_string(),
            })?;

        let chain: Arc<[BoxedMiddleware]> = table
            .global
            .iter()
            .chain(route.middleware())
            .cloned()
            .collect();

        let span = span!(
            Level::DEBUG,
            "dispatch",
            method = %method,
            service = %request.service(),
            pattern = %route.pattern(),
        );

        let mut ctx = Context::new(request, route, chain);
        let outcome = AssertUnwindSafe(async move {
            ctx.next().await;
            ctx
        })
        .catch_unwind()
        .instrument(span)
        .await;

        match outcome {
            Ok(ctx) => Ok(ctx.into_parts()),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(method = %method, panic = %message, "Handler panicked");
                Err(DispatchError::Internal(message))
            }
        }
    }

    /// Like [`handle_request`](Self::handle_request), folding every error into
    /// an error-shaped response.
    ///
    /// An aborted chain yields the response its middleware left behind, so
    /// headers and specials added after the abort are kept.
    pub async fn serve(&self, request: BoxedRequest) -> Response {
        match self.run(request).await {
            Ok((response, None)) => response,
            Ok((response, Some(err))) => {
                debug!(error = %err, "Chain aborted");
                response
            }
            Err(err) => {
                debug!(error = %err, "Dispatch failed");
                err.into_response()
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.inner.table.load();
        f.debug_struct("Engine")
            .field("global_middleware", &table.global.len())
            .field("route_count", &table.route_count())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Handler, HandlerResult, handler_fn};
    use crate::middleware::middleware_fn;
    use crate::request::RawRequest;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn reply(body: &'static str) -> BoxedHandler {
        handler_fn(move |_req| async move { Ok::<_, ServiceError>(body) })
    }

    fn get(service: &str) -> BoxedRequest {
        RawRequest::new("GET", service).boxed()
    }

    fn record(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> BoxedMiddleware {
        middleware_fn(name, move |ctx| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push(format!("{name}:before"));
                ctx.next().await;
                log.lock().push(format!("{name}:after"));
            })
        })
    }

    struct Panicking;

    #[async_trait]
    impl Handler for Panicking {
        async fn call(&self, _ctx: &mut Context) -> HandlerResult {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn routes_to_most_specific_pattern() {
        let engine = Engine::new();
        engine.handle("GET", "/t1/t2/t3", reply("exact")).unwrap();
        engine.handle("GET", "/t1/t2/*", reply("single")).unwrap();
        engine.handle("GET", "/t1/**", reply("multi")).unwrap();

        let body = |r: Response| r.into_body();
        assert_eq!(body(engine.handle_request(get("/t1/t2/t3")).await.unwrap()), Some(json!("exact")));
        assert_eq!(body(engine.handle_request(get("/t1/t2/x")).await.unwrap()), Some(json!("single")));
        assert_eq!(body(engine.handle_request(get("/t1/a/b/c")).await.unwrap()), Some(json!("multi")));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let engine = Engine::new();
        engine.handle("POST", "/order/pay", reply("ok")).unwrap();

        let err = engine.handle_request(get("/order/pay")).await.unwrap_err();
        assert!(matches!(err, DispatchError::RouteNotFound { ref method, .. } if method == "GET"));

        let response = engine.serve(get("/missing")).await;
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn methods_are_case_insensitive() {
        let engine = Engine::new();
        engine.handle("post", "/order/pay", reply("ok")).unwrap();

        let request = RawRequest::new("Post", "/order/pay").boxed();
        assert!(engine.handle_request(request).await.is_ok());
        assert!(engine.resolve("POST", "/order/pay").is_ok());
    }

    #[tokio::test]
    async fn re_registration_replaces_handler() {
        let engine = Engine::new();
        engine.handle("GET", "/order", reply("first")).unwrap();
        engine.handle("get", "/order", reply("second")).unwrap();

        assert_eq!(engine.route_count(), 1);
        let response = engine.handle_request(get("/order")).await.unwrap();
        assert_eq!(response.body(), Some(&json!("second")));
    }

    #[tokio::test]
    async fn invalid_pattern_is_rejected() {
        let engine = Engine::new();
        let err = engine.handle("GET", "/a/**/b", reply("x")).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidPattern(_)));
        assert_eq!(engine.route_count(), 0);
    }

    #[tokio::test]
    async fn global_middleware_runs_before_route_middleware() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine::new();
        engine.use_middleware(record("global", Arc::clone(&log)));
        engine
            .route(
                RouteEntry::new("GET", "/order", reply("ok"))
                    .with_middleware(record("first", Arc::clone(&log)))
                    .with_middleware(record("second", Arc::clone(&log))),
            )
            .unwrap();

        engine.handle_request(get("/order")).await.unwrap();

        assert_eq!(
            *log.lock(),
            [
                "global:before",
                "first:before",
                "second:before",
                "second:after",
                "first:after",
                "global:after",
            ]
        );
    }

    #[tokio::test]
    async fn middleware_added_after_routes_wraps_them_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine::new();
        engine.handle("GET", "/order", reply("ok")).unwrap();
        engine.use_middleware(record("outer", Arc::clone(&log)));
        engine.use_middleware(record("inner", Arc::clone(&log)));
        assert_eq!(engine.route_count(), 1);

        engine.handle_request(get("/order")).await.unwrap();

        assert_eq!(
            *log.lock(),
            ["outer:before", "inner:before", "inner:after", "outer:after"]
        );
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let engine = Engine::new();
        let reached = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&reached);
        let handler = handler_fn(move |_req| {
            let flag = Arc::clone(&flag);
            async move {
                *flag.lock() = true;
                Ok::<_, ServiceError>(())
            }
        });
        let gate = middleware_fn("gate", |ctx| {
            Box::pin(async move {
                ctx.response_mut().set_status(202);
                ctx.response_mut().write(json!({"queued": true}));
            })
        });
        engine
            .route(RouteEntry::new("GET", "/job", handler).with_middleware(gate))
            .unwrap();

        let response = engine.handle_request(get("/job")).await.unwrap();
        assert_eq!(response.status(), 202);
        assert_eq!(response.body(), Some(&json!({"queued": true})));
        assert!(!*reached.lock());
    }

    #[tokio::test]
    async fn middleware_wraps_handler_response() {
        let engine = Engine::new();
        engine.use_middleware(middleware_fn("stamp", |ctx| {
            Box::pin(async move {
                ctx.next().await;
                let written = ctx.response().is_written();
                ctx.response_mut().set_header("X-Written", written.to_string());
            })
        }));
        engine.handle("GET", "/order", reply("ok")).unwrap();

        let response = engine.handle_request(get("/order")).await.unwrap();
        assert_eq!(response.header("X-Written"), Some("true"));
    }

    #[tokio::test]
    async fn handler_error_becomes_error_response() {
        let engine = Engine::new();
        engine
            .handle(
                "GET",
                "/secure",
                handler_fn(|_req| async { Err::<Value, _>(ServiceError::unauthorized("token expired")) }),
            )
            .unwrap();

        let err = engine.handle_request(get("/secure")).await.unwrap_err();
        assert_eq!(err.status(), 401);

        let response = engine.serve(get("/secure")).await;
        assert_eq!(response.status(), 401);
        assert_eq!(response.error_message(), Some("token expired"));
    }

    #[tokio::test]
    async fn middleware_after_abort_sees_error_response() {
        let engine = Engine::new();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        engine.use_middleware(middleware_fn("observe", move |ctx| {
            let slot = Arc::clone(&slot);
            Box::pin(async move {
                ctx.next().await;
                *slot.lock() = Some((ctx.is_aborted(), ctx.response().status()));
            })
        }));
        engine
            .handle(
                "GET",
                "/fail",
                handler_fn(|_req| async { Err::<(), _>(ServiceError::bad_request("bad id")) }),
            )
            .unwrap();

        let _ = engine.handle_request(get("/fail")).await;
        assert_eq!(*seen.lock(), Some((true, 400)));
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let engine = Engine::new();
        engine.handle("GET", "/panic", Arc::new(Panicking)).unwrap();

        let err = engine.handle_request(get("/panic")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Internal(ref msg) if msg == "boom"));

        let response = engine.serve(get("/panic")).await;
        assert_eq!(response.status(), 500);
    }

    #[tokio::test]
    async fn find_checks_every_method() {
        let engine = Engine::new();
        engine.handle("GET", "/order/*", reply("ok")).unwrap();
        engine.handle("POST", "/cron/job", reply("ok")).unwrap();

        assert!(engine.find("/order/1"));
        assert!(engine.find("/cron/job"));
        assert!(!engine.find("/user/1"));
    }

    #[tokio::test]
    async fn unregister_removes_single_route() {
        let engine = Engine::new();
        engine.handle("GET", "/a", reply("a")).unwrap();
        engine.handle("GET", "/b", reply("b")).unwrap();

        assert!(engine.unregister("get", "/a"));
        assert!(!engine.unregister("GET", "/a"));
        assert!(!engine.find("/a"));
        assert!(engine.find("/b"));
    }

    #[tokio::test]
    async fn replace_routes_keeps_global_middleware() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine::new();
        engine.use_middleware(record("global", Arc::clone(&log)));
        engine.handle("GET", "/old", reply("old")).unwrap();

        engine
            .replace_routes([RouteEntry::new("GET", "/new", reply("new"))])
            .unwrap();

        assert!(!engine.find("/old"));
        engine.handle_request(get("/new")).await.unwrap();
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test]
    async fn failed_replace_leaves_table_untouched() {
        let engine = Engine::new();
        engine.handle("GET", "/old", reply("old")).unwrap();

        let result = engine.replace_routes([
            RouteEntry::new("GET", "/new", reply("new")),
            RouteEntry::new("GET", "", reply("broken")),
        ]);
        assert!(result.is_err());
        assert!(engine.find("/old"));
        assert!(!engine.find("/new"));
    }

    #[tokio::test]
    async fn in_flight_request_survives_replacement() {
        let engine = Engine::new();
        let release = Arc::new(Notify::new());
        let gate = Arc::clone(&release);
        engine
            .handle(
                "GET",
                "/slow",
                handler_fn(move |_req| {
                    let gate = Arc::clone(&gate);
                    async move {
                        gate.notified().await;
                        Ok::<_, ServiceError>("done")
                    }
                }),
            )
            .unwrap();

        let pending = tokio::spawn({
            let engine = engine.clone();
            async move { engine.handle_request(get("/slow")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        engine.replace_routes(Vec::new()).unwrap();
        assert!(!engine.find("/slow"));
        release.notify_one();

        let response = pending.await.unwrap().unwrap();
        assert_eq!(response.body(), Some(&json!("done")));
    }
}
