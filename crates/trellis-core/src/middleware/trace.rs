use async_trait::async_trait;
use tracing::info;

use super::Middleware;
use crate::context::Context;

/// Logs the request form before the chain and the final response after it.
///
/// `GET` requests carry no body worth logging, so only the response is
/// logged for them. Traced responses are tagged with the `trace` special.
#[derive(Debug, Clone, Copy, Default)]
pub struct Trace;

impl Trace {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for Trace {
    fn name(&self) -> &str {
        "trace"
    }

    async fn handle(&self, ctx: &mut Context) {
        let request = ctx.request().clone();
        if !request.method().eq_ignore_ascii_case("GET") {
            info!(
                service = request.service(),
                method = request.method(),
                form = ?request.form(),
                "> trace request"
            );
        }

        ctx.next().await;

        let response = ctx.response_mut();
        response.add_special("trace");
        info!(
            service = request.service(),
            status = response.status(),
            body = ?response.body(),
            "< trace response"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::{Value, json};

    use crate::engine::Engine;
    use crate::error::ServiceError;
    use crate::handler::handler_fn;
    use crate::middleware::middleware_fn;
    use crate::request::RawRequest;

    fn traced() -> Engine {
        let engine = Engine::new();
        engine.use_middleware(Arc::new(Trace::new()));
        engine
            .handle(
                "POST",
                "/order/create",
                handler_fn(|_req| async { Ok::<_, ServiceError>(json!({ "id": 7 })) }),
            )
            .unwrap();
        engine
            .handle(
                "GET",
                "/order/query",
                handler_fn(|_req| async { Ok::<_, ServiceError>(json!({ "id": 7 })) }),
            )
            .unwrap();
        engine
            .handle(
                "POST",
                "/order/cancel",
                handler_fn(|_req| async { Err::<Value, _>(ServiceError::unauthorized("token expired")) }),
            )
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn tags_successful_responses() {
        let engine = traced();

        let request = RawRequest::new("POST", "/order/create").with_form("sku", "A-1");
        let response = engine.serve(request.boxed()).await;
        assert!(response.is_success());
        assert_eq!(response.body(), Some(&json!({ "id": 7 })));
        assert_eq!(response.specials(), ["trace"]);

        let response = engine.serve(RawRequest::new("GET", "/order/query").boxed()).await;
        assert_eq!(response.specials(), ["trace"]);
    }

    #[tokio::test]
    async fn tags_aborted_chains() {
        let engine = traced();

        let response = engine.serve(RawRequest::new("POST", "/order/cancel").boxed()).await;
        assert_eq!(response.status(), 401);
        assert_eq!(response.error_message(), Some("token expired"));
        assert_eq!(response.specials(), ["trace"]);

        engine.use_middleware(middleware_fn("deny", |ctx| {
            Box::pin(async move { ctx.abort(ServiceError::forbidden("denied")) })
        }));
        let response = engine.serve(RawRequest::new("POST", "/order/create").boxed()).await;
        assert_eq!(response.status(), 403);
        assert_eq!(response.specials(), ["trace"]);
    }

    #[tokio::test]
    async fn handle_request_still_reports_the_abort() {
        let engine = traced();
        let err = engine
            .handle_request(RawRequest::new("POST", "/order/cancel").boxed())
            .await
            .unwrap_err();
        assert_eq!(err.status(), 401);
    }
}
