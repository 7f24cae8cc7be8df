//! Environment variable configuration surface.
//!
//! Nine fixed listener slots, one per protocol and security level:
//!
//! ```text
//! HERMINA_{MQTT,MQTT_WS,HTTP}_{WITHOUT_TLS,WITH_TLS,WITH_MTLS}_{ADDRESS,PATH_PREFIX,TARGET,
//!                                                              CERT_FILE,KEY_FILE,CLIENT_CA_FILE}
//! ```
//!
//! A slot is enabled when its `ADDRESS` is non-empty. A slot whose TLS
//! material does not match its security level is skipped like any other
//! invalid listener. Global keys cover logging, relay policy and metrics.

use std::path::PathBuf;

use crate::config::loader::ConfigError;
use crate::config::schema::{GatewayConfig, ListenerSpec, Protocol, TlsConfig, TlsMode};
use crate::config::validation::{validate_config, Validated, ValidationError, GLOBAL};

const SLOTS: [(Protocol, TlsMode, &str); 9] = [
    (Protocol::Mqtt, TlsMode::None, "MQTT_WITHOUT_TLS"),
    (Protocol::Mqtt, TlsMode::Tls, "MQTT_WITH_TLS"),
    (Protocol::Mqtt, TlsMode::MutualTls, "MQTT_WITH_MTLS"),
    (Protocol::MqttWs, TlsMode::None, "MQTT_WS_WITHOUT_TLS"),
    (Protocol::MqttWs, TlsMode::Tls, "MQTT_WS_WITH_TLS"),
    (Protocol::MqttWs, TlsMode::MutualTls, "MQTT_WS_WITH_MTLS"),
    (Protocol::Http, TlsMode::None, "HTTP_WITHOUT_TLS"),
    (Protocol::Http, TlsMode::Tls, "HTTP_WITH_TLS"),
    (Protocol::Http, TlsMode::MutualTls, "HTTP_WITH_MTLS"),
];

const PREFIX: &str = "HERMINA_";

/// Build and validate a configuration from the process environment.
pub fn load_from_env() -> Result<Validated, ConfigError> {
    from_env(|key| std::env::var(key).ok())
}

/// Build and validate a configuration from `lookup`.
pub fn from_env<F>(lookup: F) -> Result<Validated, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        lookup(&format!("{PREFIX}{key}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let mut config = GatewayConfig::default();
    let mut skipped = Vec::new();
    let mut errors = Vec::new();

    for (protocol, mode, slot) in SLOTS {
        let field = |key: &str| get(&format!("{slot}_{key}"));
        let Some(address) = field("ADDRESS") else {
            continue;
        };
        let name = slot.to_ascii_lowercase();

        let cert_file = field("CERT_FILE").map(PathBuf::from);
        let key_file = field("KEY_FILE").map(PathBuf::from);
        let client_ca_file = field("CLIENT_CA_FILE").map(PathBuf::from);

        let tls = match (mode, cert_file, key_file, client_ca_file) {
            (TlsMode::None, None, None, None) => None,
            (TlsMode::Tls, Some(cert_file), Some(key_file), None) => Some(TlsConfig {
                cert_file,
                key_file,
                client_ca_file: None,
            }),
            (TlsMode::MutualTls, Some(cert_file), Some(key_file), Some(ca)) => Some(TlsConfig {
                cert_file,
                key_file,
                client_ca_file: Some(ca),
            }),
            _ => {
                skipped.push(ValidationError {
                    listener: name,
                    field: "tls",
                    message: format!("TLS material does not match {} slot", mode.as_str()),
                });
                continue;
            }
        };

        config.listeners.push(ListenerSpec {
            name,
            protocol,
            address,
            path_prefix: field("PATH_PREFIX").unwrap_or_else(|| "/".to_string()),
            target: field("TARGET").unwrap_or_default(),
            tls,
            max_connections: 10_000,
        });
    }

    if let Some(level) = get("LOG_LEVEL") {
        config.observability.log_level = level;
    }
    config.observability.metrics_address = get("METRICS_ADDRESS");

    parse_global(&get, "LOG_FORMAT", &mut config.observability.log_format, &mut errors);
    parse_global(&get, "VETO_POLICY", &mut config.relay.veto_policy, &mut errors);
    parse_global(&get, "SHUTDOWN_MODE", &mut config.relay.shutdown_mode, &mut errors);
    parse_global(&get, "DRAIN_TIMEOUT_SECS", &mut config.relay.drain_timeout_secs, &mut errors);

    match validate_config(config) {
        Ok(validated) if errors.is_empty() => {
            skipped.extend(validated.skipped);
            Ok(Validated {
                config: validated.config,
                skipped,
            })
        }
        Ok(validated) => {
            skipped.extend(validated.skipped);
            skipped.extend(errors);
            Err(ConfigError::Validation(skipped))
        }
        Err(more) => {
            skipped.extend(more);
            skipped.extend(errors);
            Err(ConfigError::Validation(skipped))
        }
    }
}

fn parse_global<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    slot: &mut T,
    errors: &mut Vec<ValidationError>,
) where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = get(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(e) => errors.push(ValidationError {
            listener: GLOBAL.to_string(),
            field: key,
            message: format!("'{raw}': {e}"),
        }),
    }
}
