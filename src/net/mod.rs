//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs / stream.rs (optional TLS handshake, client certificate)
//!     → websocket.rs (optional WebSocket upgrade)
//!     → connection.rs (live session tracking)
//!     → hand off to the session relay
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each session tracked so a stopping listener can drain or abort
//! - TLS and WebSocket are layers over one byte stream; the relay never
//!   knows which transport it runs on

pub mod connection;
pub mod listener;
pub mod stream;
pub mod tls;
pub mod websocket;

pub use connection::{SessionGuard, SessionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use stream::NetworkStream;
pub use tls::TlsError;
pub use websocket::WsStream;

/// Path below `prefix`, matching whole segments only.
///
/// `/mqtt` admits `/mqtt` and `/mqtt/devices` but not `/mqttx`.
pub(crate) fn strip_path_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    (prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/')).then_some(rest)
}
