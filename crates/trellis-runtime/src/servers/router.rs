//! API and RPC servers.
//!
//! Both are the same thing at this layer: an engine whose route table comes
//! from a [`RouterConfig`]. They differ only in the transport that feeds them.

use std::fmt;

use tracing::info;
use trellis_core::{
    BoxedEngineService, BoxedRequest, Engine, PathMatcher, Response, RouteEntry, Services,
};

use crate::config::{AclConfig, RouterConfig, ServerConfig};
use crate::error::RuntimeResult;

/// Which router a [`RouterServer`] serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerKind {
    Api,
    Rpc,
}

impl ServerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Rpc => "rpc",
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request/response server backed by configured routes.
#[derive(Debug, Clone)]
pub struct RouterServer {
    kind: ServerKind,
    engine: Engine,
    services: Services,
}

impl RouterServer {
    /// Builds the server, installing global middleware and the configured
    /// routes.
    pub fn from_config(
        kind: ServerKind,
        server: &ServerConfig,
        acl: &AclConfig,
        router: &RouterConfig,
        services: Services,
    ) -> RuntimeResult<Self> {
        let this = Self {
            kind,
            engine: super::build_engine(server, acl)?,
            services,
        };
        this.apply(router)?;
        Ok(this)
    }

    pub fn kind(&self) -> ServerKind {
        self.kind
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Replaces the route table with `router`.
    ///
    /// Every route is resolved against the service registry first; if one
    /// fails the current table is left untouched.
    pub fn apply(&self, router: &RouterConfig) -> RuntimeResult<()> {
        let entries = self.resolve(router)?;
        let count = entries.len();
        self.engine.replace_routes(entries)?;
        info!(server = %self.kind, routes = count, "Routes applied");
        Ok(())
    }

    /// Checks that `router` would apply cleanly, without touching the table.
    pub fn check(&self, router: &RouterConfig) -> RuntimeResult<()> {
        self.resolve(router)?;
        PathMatcher::paths(router.routes.iter().map(|route| route.path.as_str()))?;
        Ok(())
    }

    fn resolve(&self, router: &RouterConfig) -> RuntimeResult<Vec<RouteEntry>> {
        let mut entries = Vec::new();
        for route in &router.routes {
            for method in &route.methods {
                entries.push(self.services.route(method, &route.path, route.service())?);
            }
        }
        Ok(entries)
    }

    /// Dispatches one request.
    pub async fn serve(&self, request: BoxedRequest) -> Response {
        self.engine.serve(request).await
    }

    /// The server as a tower service, for transports that stack layers.
    pub fn service(&self) -> BoxedEngineService {
        self.engine.clone().into_service().boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use serde_json::json;
    use trellis_core::{RawRequest, Request, ServiceError, handler_fn};

    fn services() -> Services {
        Services::new()
            .with(
                "/order/query",
                handler_fn(|req: BoxedRequest| async move {
                    Ok::<_, ServiceError>(json!({ "path": req.service() }))
                }),
            )
            .with(
                "order.any",
                handler_fn(|_req: BoxedRequest| async move { Ok::<_, ServiceError>("any") }),
            )
    }

    fn router(routes: Vec<RouteConfig>) -> RouterConfig {
        RouterConfig { routes }
    }

    #[tokio::test]
    async fn serves_configured_routes() {
        let server = RouterServer::from_config(
            ServerKind::Api,
            &ServerConfig::default(),
            &AclConfig::default(),
            &router(vec![
                RouteConfig::new("/order/query", ""),
                RouteConfig::new("/order/*", "order.any"),
            ]),
            services(),
        )
        .unwrap();

        let response = server
            .serve(RawRequest::new("get", "/order/query").boxed())
            .await;
        assert_eq!(response.body(), Some(&json!({ "path": "/order/query" })));

        let response = server
            .serve(RawRequest::new("POST", "/order/42").boxed())
            .await;
        assert_eq!(response.body(), Some(&json!("any")));

        let response = server
            .serve(RawRequest::new("DELETE", "/order/42").boxed())
            .await;
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn apply_is_atomic() {
        let server = RouterServer::from_config(
            ServerKind::Rpc,
            &ServerConfig::default(),
            &AclConfig::default(),
            &router(vec![RouteConfig::new("/order/query", "")]),
            services(),
        )
        .unwrap();

        let err = server.apply(&router(vec![
            RouteConfig::new("/order/*", "order.any"),
            RouteConfig::new("/user/info", "missing"),
        ]));
        assert!(err.is_err());
        assert!(server.engine().find("/order/query"));
        assert!(!server.engine().find("/order/42"));
    }

    #[tokio::test]
    async fn acl_applies_to_routes() {
        let acl = AclConfig {
            black_list: vec!["10.0.0.*".into()],
            ..Default::default()
        };
        let server = RouterServer::from_config(
            ServerKind::Api,
            &ServerConfig::default(),
            &acl,
            &router(vec![RouteConfig::new("/order/query", "")]),
            services(),
        )
        .unwrap();

        let request = RawRequest::new("GET", "/order/query").with_client_ip("10.0.0.7");
        assert_eq!(request.client_ip(), Some("10.0.0.7"));
        let response = server.serve(request.boxed()).await;
        assert_eq!(response.status(), 403);
    }

    #[tokio::test]
    async fn tower_service_shares_routes() {
        use tower::ServiceExt;

        let server = RouterServer::from_config(
            ServerKind::Api,
            &ServerConfig::default(),
            &AclConfig::default(),
            &router(vec![RouteConfig::new("/order/query", "")]),
            services(),
        )
        .unwrap();
        let response = server
            .service()
            .oneshot(RawRequest::new("GET", "/order/query").boxed())
            .await
            .unwrap();
        assert!(response.is_success());
    }
}
