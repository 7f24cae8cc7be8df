//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! TOML file ──▶ loader.rs (parse & deserialize) ─┐
//!                                                ├─▶ validation.rs ─▶ GatewayConfig
//! HERMINA_* environment ──▶ env.rs (nine slots) ─┘                    (immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod env;
pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    GatewayConfig, HttpConfig, ListenerSpec, LogFormat, ObservabilityConfig, Protocol, RelayConfig, ShutdownMode,
    TlsConfig, TlsMode,
};
pub use validation::{Validated, ValidationError};
