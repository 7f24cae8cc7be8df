//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check target formats against the listener protocol
//! - Detect duplicate listener names and bind addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - A listener with problems of its own is dropped; its siblings still start.
//!   Configuration-wide problems, or no listener left, fail the whole load
//! - TLS files are checked for presence only; loading happens per listener at startup

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{GatewayConfig, ListenerSpec, Protocol};

/// Listener name used for problems that are not tied to one listener.
pub const GLOBAL: &str = "*";

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("listener '{listener}': {field}: {message}")]
pub struct ValidationError {
    pub listener: String,
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub(crate) fn new(listener: &str, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            listener: listener.to_string(),
            field,
            message: message.into(),
        }
    }

    /// Whether the problem concerns the whole configuration.
    pub fn is_global(&self) -> bool {
        self.listener == GLOBAL
    }
}

/// A configuration whose remaining listeners all passed validation.
#[derive(Debug, Clone)]
pub struct Validated {
    pub config: GatewayConfig,
    /// Problems of the listeners that were dropped.
    pub skipped: Vec<ValidationError>,
}

/// Validate `config`, dropping listeners that have problems of their own.
///
/// Fails with every problem found when a configuration-wide setting is
/// invalid or when no listener is left.
pub fn validate_config(mut config: GatewayConfig) -> Result<Validated, Vec<ValidationError>> {
    let mut errors = check_globals(&config);
    let mut names = HashSet::new();
    let mut addresses = HashSet::new();

    if config.listeners.is_empty() {
        errors.push(ValidationError::new(GLOBAL, "listeners", "no listener configured"));
    }

    let mut skipped = Vec::new();
    config.listeners.retain(|listener| {
        let problems = check_listener(listener, &names, &addresses);
        if !problems.is_empty() {
            skipped.extend(problems);
            return false;
        }
        names.insert(listener.name.clone());
        if let Ok(addr) = listener.address.parse::<SocketAddr>() {
            addresses.insert(addr);
        }
        true
    });

    if config.listeners.is_empty() && !skipped.is_empty() {
        errors.push(ValidationError::new(GLOBAL, "listeners", "no usable listener left"));
    }

    if errors.is_empty() {
        Ok(Validated { config, skipped })
    } else {
        skipped.extend(errors);
        Err(skipped)
    }
}

fn check_globals(config: &GatewayConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.relay.max_packet_size == 0 {
        errors.push(ValidationError::new(GLOBAL, "relay.max_packet_size", "must be greater than 0"));
    }

    if let Some(addr) = &config.observability.metrics_address {
        if addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                GLOBAL,
                "observability.metrics_address",
                format!("'{addr}' is not a socket address"),
            ));
        }
    }
    errors
}

/// Problems of one listener, given the names and addresses already taken.
fn check_listener(
    listener: &ListenerSpec,
    names: &HashSet<String>,
    addresses: &HashSet<SocketAddr>,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let name = listener.name.as_str();

    if name.is_empty() {
        errors.push(ValidationError::new("", "name", "must not be empty"));
    } else if names.contains(name) {
        errors.push(ValidationError::new(name, "name", "duplicate listener name"));
    }

    match listener.address.parse::<SocketAddr>() {
        // port 0 never collides
        Ok(addr) if addr.port() != 0 && addresses.contains(&addr) => errors.push(ValidationError::new(
            name,
            "address",
            format!("{addr} is used by another listener"),
        )),
        Ok(_) => {}
        Err(_) => errors.push(ValidationError::new(
            name,
            "address",
            format!("'{}' is not a socket address", listener.address),
        )),
    }

    if !listener.path_prefix.starts_with('/') {
        errors.push(ValidationError::new(name, "path_prefix", "must start with '/'"));
    }

    if listener.max_connections == 0 {
        errors.push(ValidationError::new(name, "max_connections", "must be greater than 0"));
    }

    if let Err(message) = check_target(listener) {
        errors.push(ValidationError::new(name, "target", message));
    }

    if let Some(tls) = &listener.tls {
        if tls.cert_file.as_os_str().is_empty() {
            errors.push(ValidationError::new(name, "tls.cert_file", "must not be empty"));
        }
        if tls.key_file.as_os_str().is_empty() {
            errors.push(ValidationError::new(name, "tls.key_file", "must not be empty"));
        }
        if tls.client_ca_file.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
            errors.push(ValidationError::new(name, "tls.client_ca_file", "must not be empty"));
        }
    }
    errors
}

fn check_target(listener: &ListenerSpec) -> Result<(), String> {
    let target = listener.target.trim();
    if target.is_empty() {
        return Err("must not be empty".to_string());
    }

    match listener.protocol {
        Protocol::Mqtt => match target.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
            _ => Err(format!("'{target}' is not host:port")),
        },
        Protocol::MqttWs => check_url(target, "ws"),
        Protocol::Http => check_url(target, "http"),
    }
}

fn check_url(target: &str, scheme: &str) -> Result<(), String> {
    let url = Url::parse(target).map_err(|e| format!("'{target}': {e}"))?;
    if url.scheme() != scheme {
        return Err(format!("scheme '{}' is not supported, expected '{scheme}'", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err(format!("'{target}' has no host"));
    }
    Ok(())
}
