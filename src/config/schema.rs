//! Configuration schema definitions.
//!
//! Every type derives Serde traits for deserialization from TOML. The
//! environment surface in `env.rs` builds the same structure.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mqtt::MAX_REMAINING_LENGTH;
use crate::session::VetoPolicy;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listeners to start. Each one is independent of the others.
    pub listeners: Vec<ListenerSpec>,

    /// Session relay behavior shared by MQTT listeners.
    pub relay: RelayConfig,

    /// HTTP proxy limits.
    pub http: HttpConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Protocol spoken by a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// MQTT over raw TCP.
    Mqtt,
    /// MQTT over WebSocket.
    MqttWs,
    /// HTTP reverse proxy.
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Mqtt => "mqtt",
            Protocol::MqttWs => "mqtt_ws",
            Protocol::Http => "http",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One listener slot.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerSpec {
    /// Unique name used in logs and metrics.
    pub name: String,

    pub protocol: Protocol,

    /// Bind address (e.g., "0.0.0.0:1883").
    pub address: String,

    /// Only requests whose path starts with this prefix are served
    /// (WebSocket and HTTP listeners).
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// `host:port` for mqtt, `ws://` URL for mqtt_ws, `http://` URL for http.
    pub target: String,

    /// Optional TLS material. Absent means plaintext.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_path_prefix() -> String {
    "/".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

/// Transport security of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    None,
    /// Server certificate only.
    Tls,
    /// Server certificate plus a required, verified client certificate.
    MutualTls,
}

impl TlsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsMode::None => "none",
            TlsMode::Tls => "tls",
            TlsMode::MutualTls => "mtls",
        }
    }
}

/// TLS material for a listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to the certificate chain (PEM).
    pub cert_file: PathBuf,

    /// Path to the private key (PEM).
    pub key_file: PathBuf,

    /// CA bundle used to verify client certificates. Presence enables mTLS.
    #[serde(default)]
    pub client_ca_file: Option<PathBuf>,
}

impl TlsConfig {
    pub fn mode(&self) -> TlsMode {
        if self.client_ca_file.is_some() {
            TlsMode::MutualTls
        } else {
            TlsMode::Tls
        }
    }
}

impl ListenerSpec {
    pub fn tls_mode(&self) -> TlsMode {
        self.tls.as_ref().map_or(TlsMode::None, TlsConfig::mode)
    }
}

/// What a listener does with live sessions when it is told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Stop accepting; live sessions run until they end on their own.
    #[default]
    StopAccepting,
    /// Stop accepting and wait for live sessions, up to the drain timeout.
    Drain,
    /// Stop accepting and cancel every live session.
    Abort,
}

impl std::str::FromStr for ShutdownMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop_accepting" => Ok(ShutdownMode::StopAccepting),
            "drain" => Ok(ShutdownMode::Drain),
            "abort" => Ok(ShutdownMode::Abort),
            other => Err(format!("unknown shutdown mode '{other}'")),
        }
    }
}

/// Relay behavior for MQTT sessions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    pub veto_policy: VetoPolicy,

    pub shutdown_mode: ShutdownMode,

    /// Bound on waiting for live sessions in `drain` mode, in seconds.
    pub drain_timeout_secs: u64,

    /// Upstream dial timeout in seconds.
    pub connect_timeout_secs: u64,

    /// TLS and WebSocket handshake timeout in seconds.
    pub handshake_timeout_secs: u64,

    /// Largest accepted remaining length of a single packet.
    pub max_packet_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            veto_policy: VetoPolicy::default(),
            shutdown_mode: ShutdownMode::default(),
            drain_timeout_secs: 30,
            connect_timeout_secs: 10,
            handshake_timeout_secs: 10,
            max_packet_size: MAX_REMAINING_LENGTH,
        }
    }
}

impl RelayConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// HTTP proxy limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Total time for a forwarded request, in seconds.
    pub request_timeout_secs: u64,

    /// Largest request body accepted, in bytes.
    pub max_body_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Prometheus scrape endpoint. Metrics are not exported when unset.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            metrics_address: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_listener_gets_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[listeners]]
            name = "mqtt"
            protocol = "mqtt"
            address = "127.0.0.1:1884"
            target = "127.0.0.1:1883"
            "#,
        )
        .unwrap();

        let listener = &config.listeners[0];
        assert_eq!(listener.path_prefix, "/");
        assert_eq!(listener.max_connections, 10_000);
        assert_eq!(listener.tls_mode(), TlsMode::None);
        assert_eq!(config.relay.shutdown_mode, ShutdownMode::StopAccepting);
        assert_eq!(config.relay.veto_policy, VetoPolicy::Continue);
        assert_eq!(config.relay.max_packet_size, MAX_REMAINING_LENGTH);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn tls_mode_follows_material() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [relay]
            veto_policy = "terminate"
            shutdown_mode = "drain"

            [[listeners]]
            name = "mqtts"
            protocol = "mqtt_ws"
            address = "0.0.0.0:8884"
            path_prefix = "/mqtt"
            target = "ws://broker:8080/mqtt"
            tls = { cert_file = "server.crt", key_file = "server.key", client_ca_file = "ca.crt" }
            "#,
        )
        .unwrap();

        assert_eq!(config.listeners[0].protocol, Protocol::MqttWs);
        assert_eq!(config.listeners[0].tls_mode(), TlsMode::MutualTls);
        assert_eq!(config.relay.veto_policy, VetoPolicy::Terminate);
        assert_eq!(config.relay.shutdown_mode, ShutdownMode::Drain);
    }

    #[test]
    fn shutdown_mode_parses_from_text() {
        assert_eq!("ABORT".parse::<ShutdownMode>().unwrap(), ShutdownMode::Abort);
        assert!("later".parse::<ShutdownMode>().is_err());
    }
}
