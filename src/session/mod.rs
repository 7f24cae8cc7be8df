//! Session subsystem: one client connection paired with one upstream connection.
//!
//! # Data Flow
//! ```text
//!                 ┌──────────── Session ────────────┐
//! client ──read──▶│ Upstream pump:  decode → authorize → intercept → write │──▶ target
//! client ◀─write──│ Downstream pump: decode → authorize → intercept → write │◀── target
//!                 └─────────────────────────────────┘
//! ```
//!
//! # Design Decisions
//! - Two tasks per session, one per direction, coordinated only by a
//!   cancellation token: whichever pump stops first stops the other
//! - A pump reads the next packet only after the previous write finished,
//!   so a slow destination applies backpressure to its source
//! - The Upstream pump owns the session identity and publishes updates
//!   (credentials learned from CONNECT) to the Downstream pump over a watch channel

pub mod handler;
pub mod interceptor;
pub mod relay;

use std::net::SocketAddr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::mqtt::PacketError;

pub use handler::{AllowAll, Handler, HandlerError, LoggingHandler};
pub use interceptor::{InterceptError, Interceptor, VetoPolicy};
pub use relay::Session;

/// Direction a packet travels through a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Client to target.
    Upstream,
    /// Target to client.
    Downstream,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upstream => "upstream",
            Direction::Downstream => "downstream",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a session as seen by handlers and interceptors.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: Uuid,
    /// Name of the listener that accepted the client.
    pub listener: String,
    /// Address of the client, when known.
    pub peer_addr: Option<SocketAddr>,
    /// Client identifier from CONNECT.
    pub client_id: String,
    /// Username from CONNECT or HTTP credentials.
    pub username: String,
    /// Password from CONNECT or HTTP credentials.
    pub password: Vec<u8>,
    /// DER encoded client certificate presented during a mutual TLS handshake.
    pub client_cert: Option<Bytes>,
}

impl SessionInfo {
    /// Create an identity with a fresh session ID.
    pub fn new(listener: impl Into<String>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            id: Uuid::new_v4(),
            listener: listener.into(),
            peer_addr,
            ..Default::default()
        }
    }

    pub fn with_client_cert(mut self, cert: Option<Bytes>) -> Self {
        self.client_cert = cert;
        self
    }
}

/// Reasons a session ends abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Framing broke mid-stream; the byte stream cannot be resynchronised.
    #[error("{direction} decode error: {source}")]
    Decode {
        direction: Direction,
        #[source]
        source: PacketError,
    },

    /// A connection failed while reading or writing.
    #[error("{direction} i/o error: {source}")]
    Io {
        direction: Direction,
        #[source]
        source: std::io::Error,
    },

    /// The interceptor vetoed a packet and the veto policy ends the session.
    #[error("{direction} packet vetoed: {source}")]
    Vetoed {
        direction: Direction,
        #[source]
        source: InterceptError,
    },

    /// The handler refused to authorize the client.
    #[error("{direction} unauthorized: {source}")]
    Unauthorized {
        direction: Direction,
        #[source]
        source: HandlerError,
    },

    /// A pump task panicked or was aborted.
    #[error("session task failed: {0}")]
    Task(String),
}

impl SessionError {
    pub(crate) fn from_packet(direction: Direction, err: PacketError) -> Self {
        match err {
            PacketError::Io(source) => SessionError::Io { direction, source },
            source => SessionError::Decode { direction, source },
        }
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Decode { .. } => "decode",
            SessionError::Io { .. } => "io",
            SessionError::Vetoed { .. } => "vetoed",
            SessionError::Unauthorized { .. } => "unauthorized",
            SessionError::Task(_) => "task",
        }
    }
}
