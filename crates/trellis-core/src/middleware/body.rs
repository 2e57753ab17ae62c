use async_trait::async_trait;
use serde_json::Value;

use super::Middleware;
use crate::context::Context;

/// Form key under which adapters keep the undecoded message body.
pub const RAW_BODY_KEY: &str = "__body_";

/// The raw request body, stored in the context state by [`Body`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawBody(pub String);

impl RawBody {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Copies the raw body carried in the form into the request-scoped state.
///
/// Handlers read it back with `ctx.get_state::<RawBody>()`. Requests without
/// a raw body are passed through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Body;

#[async_trait]
impl Middleware for Body {
    fn name(&self) -> &str {
        "body"
    }

    async fn handle(&self, ctx: &mut Context) {
        let raw = match ctx.request().form().get(RAW_BODY_KEY) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        };
        if let Some(raw) = raw {
            ctx.set_state(RawBody(raw));
        }
        ctx.next().await;
    }
}
