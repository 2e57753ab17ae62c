//! IP access control.
//!
//! Both lists are built from [`PathMatcher`]s: request paths are matched with
//! `/` as the separator and addresses with `.`, so `192.168.*.*` or `10.**`
//! work the same way route wildcards do.

use async_trait::async_trait;
use tracing::warn;

use super::Middleware;
use crate::context::Context;
use crate::error::{PatternError, ServiceError};
use crate::pattern::PathMatcher;

/// One allow rule: requests whose path matches `requests` must come from an
/// address matching `ips`.
#[derive(Debug, Clone)]
pub struct IpRule {
    requests: PathMatcher,
    ips: PathMatcher,
}

impl IpRule {
    pub fn new<R, I, S, T>(requests: R, ips: I) -> Result<Self, PatternError>
    where
        R: IntoIterator<Item = S>,
        I: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Ok(Self {
            requests: PathMatcher::paths(requests)?,
            ips: PathMatcher::ips(ips)?,
        })
    }

    /// Returns `true` if this rule governs `path`.
    pub fn covers(&self, path: &str) -> bool {
        self.requests.is_match(path)
    }

    /// Returns `true` if `ip` is allowed by this rule.
    pub fn allows(&self, ip: &str) -> bool {
        self.ips.is_match(ip)
    }
}

/// Per-path allow lists.
///
/// The first rule covering the request path decides. Paths no rule covers
/// are let through.
#[derive(Debug, Clone, Default)]
pub struct WhiteList {
    rules: Vec<IpRule>,
}

impl WhiteList {
    pub fn new(rules: Vec<IpRule>) -> Self {
        Self { rules }
    }

    /// Returns `true` if a request for `path` from `ip` may proceed.
    pub fn permits(&self, path: &str, ip: Option<&str>) -> bool {
        match self.rules.iter().find(|rule| rule.covers(path)) {
            Some(rule) => ip.is_some_and(|ip| rule.allows(ip)),
            None => true,
        }
    }
}

#[async_trait]
impl Middleware for WhiteList {
    fn name(&self) -> &str {
        "white_list"
    }

    async fn handle(&self, ctx: &mut Context) {
        let request = ctx.request().clone();
        if !self.permits(request.service(), request.client_ip()) {
            warn!(
                service = request.service(),
                ip = request.client_ip().unwrap_or("-"),
                "Request rejected by white list"
            );
            ctx.abort(ServiceError::forbidden(format!(
                "{} is not allowed to access {}",
                request.client_ip().unwrap_or("unknown address"),
                request.service()
            )));
            return;
        }
        ctx.next().await;
    }
}

/// Addresses that are always rejected.
#[derive(Debug, Clone, Default)]
pub struct BlackList {
    ips: PathMatcher,
}

impl BlackList {
    pub fn new<I, S>(ips: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            ips: PathMatcher::ips(ips)?,
        })
    }

    /// Returns `true` if `ip` is denied.
    pub fn denies(&self, ip: &str) -> bool {
        self.ips.is_match(ip)
    }
}

#[async_trait]
impl Middleware for BlackList {
    fn name(&self) -> &str {
        "black_list"
    }

    async fn handle(&self, ctx: &mut Context) {
        if let Some(ip) = ctx.request().client_ip()
            && self.denies(ip)
        {
            warn!(ip, service = ctx.request().service(), "Request rejected by black list");
            let message = format!("{ip} is blacklisted");
            ctx.abort(ServiceError::forbidden(message));
            return;
        }
        ctx.next().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_list_first_covering_rule_decides() {
        let list = WhiteList::new(vec![
            IpRule::new(["/admin/**"], ["192.168.1.*"]).unwrap(),
            IpRule::new(["/**"], ["10.**"]).unwrap(),
        ]);

        assert!(list.permits("/admin/users", Some("192.168.1.7")));
        assert!(!list.permits("/admin/users", Some("10.0.0.1")));
        assert!(list.permits("/order/list", Some("10.0.0.1")));
        assert!(!list.permits("/order/list", Some("172.16.0.1")));
    }

    #[test]
    fn white_list_denies_unknown_address_on_covered_path() {
        let list = WhiteList::new(vec![IpRule::new(["/admin/*"], ["127.0.0.1"]).unwrap()]);
        assert!(!list.permits("/admin/users", None));
        assert!(list.permits("/public", None));
    }

    #[test]
    fn black_list_matches_wildcards() {
        let list = BlackList::new(["192.168.*.1", "10.**"]).unwrap();
        assert!(list.denies("192.168.5.1"));
        assert!(list.denies("10.1.2.3"));
        assert!(!list.denies("192.168.5.2"));
    }
}
