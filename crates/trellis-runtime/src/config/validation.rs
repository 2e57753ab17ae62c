//! Configuration validation utilities.

use std::collections::HashSet;

use trellis_core::PathMatcher;

use super::error::{ConfigError, ConfigResult};
use super::schema::{AclConfig, CronConfig, LogOutput, MqcConfig, RouterConfig, TrellisConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &TrellisConfig) -> ConfigResult<()> {
    if config.server.name.trim().is_empty() {
        return Err(ConfigError::missing_field("server.name"));
    }
    if config.logging.output == LogOutput::File && config.logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    validate_router("api", &config.api)?;
    validate_router("rpc", &config.rpc)?;
    validate_acl(&config.acl)?;
    validate_cron(&config.cron)?;
    validate_mqc(&config.mqc)?;
    Ok(())
}

/// Validates the routes of one router server.
fn validate_router(section: &str, router: &RouterConfig) -> ConfigResult<()> {
    for route in &router.routes {
        if route.path.is_empty() {
            return Err(ConfigError::missing_field(format!("{section}.routes.path")));
        }
        if route.methods.is_empty() {
            return Err(ConfigError::validation(format!(
                "Route {} in {section} has no methods",
                route.path
            )));
        }
        PathMatcher::paths([&route.path])
            .map_err(|e| ConfigError::invalid_pattern(section, &route.path, e))?;
    }
    Ok(())
}

/// Validates white and black list patterns.
fn validate_acl(acl: &AclConfig) -> ConfigResult<()> {
    for rule in &acl.white_list {
        if rule.requests.is_empty() || rule.ips.is_empty() {
            return Err(ConfigError::validation(
                "White list rules need at least one request and one ip pattern",
            ));
        }
        for request in &rule.requests {
            PathMatcher::paths([request])
                .map_err(|e| ConfigError::invalid_pattern("acl.white_list", request, e))?;
        }
        for ip in &rule.ips {
            PathMatcher::ips([ip])
                .map_err(|e| ConfigError::invalid_pattern("acl.white_list", ip, e))?;
        }
    }
    for ip in &acl.black_list {
        PathMatcher::ips([ip]).map_err(|e| ConfigError::invalid_pattern("acl.black_list", ip, e))?;
    }
    Ok(())
}

/// Validates wheel dimensions and task names.
fn validate_cron(cron: &CronConfig) -> ConfigResult<()> {
    if cron.span_ms == 0 {
        return Err(ConfigError::validation("cron.span_ms must be greater than 0"));
    }
    if cron.length == 0 {
        return Err(ConfigError::validation("cron.length must be greater than 0"));
    }

    let mut names = HashSet::new();
    for task in &cron.tasks {
        if task.service.is_empty() {
            return Err(ConfigError::missing_field("cron.tasks.service"));
        }
        if task.cron.trim().is_empty() {
            return Err(ConfigError::missing_field("cron.tasks.cron"));
        }
        if !names.insert(task.name()) {
            return Err(ConfigError::DuplicateTask(task.name().to_string()));
        }
    }
    Ok(())
}

/// Validates queue bindings.
fn validate_mqc(mqc: &MqcConfig) -> ConfigResult<()> {
    let mut queues = HashSet::new();
    for binding in &mqc.queues {
        if binding.queue.is_empty() {
            return Err(ConfigError::missing_field("mqc.queues.queue"));
        }
        if binding.service.is_empty() {
            return Err(ConfigError::missing_field("mqc.queues.service"));
        }
        if !queues.insert(binding.queue.as_str()) {
            return Err(ConfigError::DuplicateQueue(binding.queue.clone()));
        }
    }
    Ok(())
}
