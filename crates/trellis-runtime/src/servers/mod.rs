//! Transport-agnostic protocol servers.
//!
//! Every server owns its own [`Engine`](trellis_core::Engine). Transports
//! (an HTTP listener, an RPC codec, a queue client) hand requests to the
//! server; the server runs them through the engine and returns the response.

mod cron;
mod mqc;
mod router;

pub use cron::CronServer;
pub use mqc::{MqcServer, QueueMessage, QueueRequest};
pub use router::{RouterServer, ServerKind};

use std::sync::Arc;

use trellis_core::middleware::{BlackList, Body, IpRule, ResponseHeaders, Trace, WhiteList};
use trellis_core::{BoxedMiddleware, Engine};

use crate::config::{AclConfig, ServerConfig};
use crate::error::RuntimeResult;

/// Builds the global middleware shared by all servers.
///
/// Order: trace, black list, white list, response headers, raw body.
pub fn build_middleware(
    server: &ServerConfig,
    acl: &AclConfig,
) -> RuntimeResult<Vec<BoxedMiddleware>> {
    let mut chain: Vec<BoxedMiddleware> = Vec::new();

    if server.trace {
        chain.push(Arc::new(Trace::new()));
    }
    if !acl.black_list.is_empty() {
        chain.push(Arc::new(BlackList::new(&acl.black_list)?));
    }
    if !acl.white_list.is_empty() {
        let rules = acl
            .white_list
            .iter()
            .map(|rule| IpRule::new(&rule.requests, &rule.ips))
            .collect::<Result<Vec<_>, _>>()?;
        chain.push(Arc::new(WhiteList::new(rules)));
    }
    if !server.headers.is_empty() {
        chain.push(Arc::new(ResponseHeaders::new(server.headers.clone())));
    }
    chain.push(Arc::new(Body));

    Ok(chain)
}

/// Creates an engine with the global middleware installed.
pub(crate) fn build_engine(server: &ServerConfig, acl: &AclConfig) -> RuntimeResult<Engine> {
    let engine = Engine::new();
    for middleware in build_middleware(server, acl)? {
        engine.use_middleware(middleware);
    }
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpRuleConfig;

    #[test]
    fn default_chain_only_reads_body() {
        let chain = build_middleware(&ServerConfig::default(), &AclConfig::default()).unwrap();
        let names: Vec<_> = chain.iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, ["body"]);
    }

    #[test]
    fn full_chain_order() {
        let mut server = ServerConfig {
            trace: true,
            ..Default::default()
        };
        server.headers.insert("X-Server".into(), "trellis".into());
        let acl = AclConfig {
            white_list: vec![IpRuleConfig {
                requests: vec!["/admin/**".into()],
                ips: vec!["10.**".into()],
            }],
            black_list: vec!["192.168.1.*".into()],
        };

        let chain = build_middleware(&server, &acl).unwrap();
        let names: Vec<_> = chain.iter().map(|m| m.name().to_string()).collect();
        assert_eq!(
            names,
            ["trace", "black_list", "white_list", "response_headers", "body"]
        );
    }

    #[test]
    fn bad_acl_pattern_fails() {
        let acl = AclConfig {
            black_list: vec!["10.**.1".into()],
            ..Default::default()
        };
        assert!(build_middleware(&ServerConfig::default(), &acl).is_err());
    }
}
