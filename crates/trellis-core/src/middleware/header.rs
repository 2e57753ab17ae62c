use std::collections::BTreeMap;

use async_trait::async_trait;

use super::Middleware;
use crate::context::Context;

/// Adds a fixed set of headers to every response.
///
/// Headers are applied after the chain returns, so values a handler set
/// explicitly are overwritten.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders {
    headers: BTreeMap<String, String>,
}

impl ResponseHeaders {
    pub fn new<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

#[async_trait]
impl Middleware for ResponseHeaders {
    fn name(&self) -> &str {
        "response_headers"
    }

    async fn handle(&self, ctx: &mut Context) {
        ctx.next().await;

        let response = ctx.response_mut();
        for (key, value) in &self.headers {
            response.set_header(key.clone(), value.clone());
        }
    }
}
