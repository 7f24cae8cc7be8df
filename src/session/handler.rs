//! Application handler capability.
//!
//! The handler owns authentication and authorization. The relay calls the
//! `auth_*` methods before forwarding and the notification methods after a
//! packet reached its destination.

use async_trait::async_trait;
use thiserror::Error;

use crate::session::SessionInfo;

/// Errors returned by a [`Handler`].
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("handler failure: {0}")]
    Internal(String),
}

/// Authentication, authorization and notification hooks.
///
/// Every method defaults to allowing the operation. Implementations are shared
/// by all sessions of all listeners and must be safe to call concurrently.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Authorize a client connection. Called on CONNECT, or per HTTP request.
    async fn auth_connect(&self, _session: &SessionInfo) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Authorize a client publishing to `topic`.
    async fn auth_publish(&self, _session: &SessionInfo, _topic: &str, _payload: &[u8]) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Authorize a client subscribing to, or receiving messages on, `topics`.
    async fn auth_subscribe(&self, _session: &SessionInfo, _topics: &[String]) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn connect(&self, _session: &SessionInfo) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn publish(&self, _session: &SessionInfo, _topic: &str, _payload: &[u8]) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn subscribe(&self, _session: &SessionInfo, _topics: &[String]) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn unsubscribe(&self, _session: &SessionInfo, _topics: &[String]) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn disconnect(&self, _session: &SessionInfo) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Handler that allows everything silently.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Handler for AllowAll {}

/// Handler that allows everything and logs each call.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl Handler for LoggingHandler {
    async fn auth_connect(&self, session: &SessionInfo) -> Result<(), HandlerError> {
        tracing::info!(
            session_id = %session.id,
            client_id = %session.client_id,
            username = %session.username,
            mtls = session.client_cert.is_some(),
            "auth connect"
        );
        Ok(())
    }

    async fn auth_publish(&self, session: &SessionInfo, topic: &str, payload: &[u8]) -> Result<(), HandlerError> {
        tracing::info!(session_id = %session.id, topic, bytes = payload.len(), "auth publish");
        Ok(())
    }

    async fn auth_subscribe(&self, session: &SessionInfo, topics: &[String]) -> Result<(), HandlerError> {
        tracing::info!(session_id = %session.id, ?topics, "auth subscribe");
        Ok(())
    }

    async fn connect(&self, session: &SessionInfo) -> Result<(), HandlerError> {
        tracing::info!(session_id = %session.id, client_id = %session.client_id, "connect");
        Ok(())
    }

    async fn publish(&self, session: &SessionInfo, topic: &str, payload: &[u8]) -> Result<(), HandlerError> {
        tracing::info!(session_id = %session.id, topic, bytes = payload.len(), "publish");
        Ok(())
    }

    async fn subscribe(&self, session: &SessionInfo, topics: &[String]) -> Result<(), HandlerError> {
        tracing::info!(session_id = %session.id, ?topics, "subscribe");
        Ok(())
    }

    async fn unsubscribe(&self, session: &SessionInfo, topics: &[String]) -> Result<(), HandlerError> {
        tracing::info!(session_id = %session.id, ?topics, "unsubscribe");
        Ok(())
    }

    async fn disconnect(&self, session: &SessionInfo) -> Result<(), HandlerError> {
        tracing::info!(session_id = %session.id, client_id = %session.client_id, "disconnect");
        Ok(())
    }
}
