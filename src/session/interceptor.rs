//! Interception hook.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mqtt::ControlPacket;
use crate::session::{Direction, SessionInfo};

/// A veto raised by an [`Interceptor`].
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct InterceptError {
    reason: String,
}

impl InterceptError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Observes, rewrites or vetoes every packet flowing through a session.
///
/// - `Ok(Some(packet))` forwards `packet` (the original or a replacement).
/// - `Ok(None)` drops the packet quietly; the session always continues.
/// - `Err(_)` vetoes the packet; it is dropped and the session's
///   [`VetoPolicy`] decides whether the session continues.
///
/// One instance is shared by every session and both directions, so calls
/// arrive concurrently. The relay abandons a pending call when its session is
/// cancelled.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(
        &self,
        session: &SessionInfo,
        packet: ControlPacket,
        direction: Direction,
    ) -> Result<Option<ControlPacket>, InterceptError>;
}

/// What a session does after its interceptor vetoes a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VetoPolicy {
    /// Drop the packet and keep relaying.
    #[default]
    Continue,
    /// Drop the packet and end the session.
    Terminate,
}

impl std::str::FromStr for VetoPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(VetoPolicy::Continue),
            "terminate" => Ok(VetoPolicy::Terminate),
            other => Err(format!("unknown veto policy '{other}'")),
        }
    }
}
