//! Hermina: an intercepting gateway for MQTT, MQTT over WebSocket and HTTP.

pub mod config;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod mqtt;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod session;

pub use config::GatewayConfig;
pub use gateway::Gateway;
pub use lifecycle::Shutdown;
pub use session::{Direction, Handler, Interceptor, Session, SessionInfo};
