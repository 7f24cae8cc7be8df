//! MQTT listener: raw TCP or WebSocket, with optional TLS.
//!
//! # Data Flow
//! ```text
//! accept ─▶ TLS handshake? ─▶ WebSocket upgrade? ─▶ dial target ─▶ Session::run
//!   │                                                                 │
//!   └── one task per connection; failures end that connection only ───┘
//! ```
//!
//! # Design Decisions
//! - Sessions hang off a token owned by the listener, not the gateway
//!   shutdown token, so the shutdown mode alone decides their fate
//! - Handshake and dial are bounded by timeouts and abandoned on cancellation

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, ListenerSpec, Protocol, RelayConfig, ShutdownMode, ValidationError};
use crate::net::{tls, websocket, Listener, ListenerError, NetworkStream, SessionTracker};
use crate::observability::metrics;
use crate::session::{Handler, Interceptor, Session, SessionError, SessionInfo};

/// Failure of a single client connection. Never fatal to the listener.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    #[error("WebSocket upgrade failed: {0}")]
    Upgrade(String),

    #[error("failed to reach {target}: {reason}")]
    Dial { target: String, reason: String },

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ConnectionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionError::Handshake(_) => "handshake",
            ConnectionError::Upgrade(_) => "upgrade",
            ConnectionError::Dial { .. } => "dial",
            ConnectionError::Session(e) => e.kind(),
        }
    }
}

/// How client bytes are carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    WebSocket,
}

struct Inner {
    name: String,
    transport: Transport,
    address: String,
    path_prefix: String,
    target: String,
    max_connections: usize,
    tls: Option<TlsAcceptor>,
    handler: Arc<dyn Handler>,
    interceptor: Option<Arc<dyn Interceptor>>,
    relay: RelayConfig,
}

/// An MQTT proxy bound to one listener slot.
#[derive(Clone)]
pub struct MqttProxy {
    inner: Arc<Inner>,
}

impl MqttProxy {
    /// Build a proxy for an `mqtt` or `mqtt_ws` listener, loading its TLS material.
    pub fn new(
        spec: &ListenerSpec,
        relay: RelayConfig,
        handler: Arc<dyn Handler>,
        interceptor: Option<Arc<dyn Interceptor>>,
    ) -> Result<Self, ConfigError> {
        let transport = match spec.protocol {
            Protocol::Mqtt => Transport::Tcp,
            Protocol::MqttWs => Transport::WebSocket,
            Protocol::Http => {
                return Err(ConfigError::Validation(vec![ValidationError {
                    listener: spec.name.clone(),
                    field: "protocol",
                    message: "http listeners are not served by the MQTT proxy".to_string(),
                }]))
            }
        };

        let tls = spec
            .tls
            .as_ref()
            .map(|t| tls::build_server_config(t, &[]))
            .transpose()?
            .map(TlsAcceptor::from);

        Ok(Self {
            inner: Arc::new(Inner {
                name: spec.name.clone(),
                transport,
                address: spec.address.clone(),
                path_prefix: spec.path_prefix.clone(),
                target: spec.target.clone(),
                max_connections: spec.max_connections,
                tls,
                handler,
                interceptor,
                relay,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn listen(&self, shutdown: CancellationToken) -> Result<(), ListenerError> {
        let listener = Listener::bind(&self.inner.address, self.inner.max_connections).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener until `shutdown` fires
    /// or accepting fails for good.
    pub async fn serve(&self, listener: Listener, shutdown: CancellationToken) -> Result<(), ListenerError> {
        let name = self.inner.name.as_str();
        let sessions = CancellationToken::new();
        let tracker = SessionTracker::new(name);

        tracing::info!(
            listener = %name,
            address = %listener.local_addr().map_err(ListenerError::Accept)?,
            target = %self.inner.target,
            transport = ?self.inner.transport,
            tls = self.inner.tls.is_some(),
            "MQTT proxy listening"
        );

        let result = loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => accepted,
            };
            let (stream, peer_addr, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => break Err(e),
            };

            let inner = Arc::clone(&self.inner);
            let guard = tracker.track();
            let token = sessions.child_token();
            tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                if let Err(err) = inner.handle(stream, peer_addr, token).await {
                    inner.report(peer_addr, &err);
                }
            });
        };
        drop(listener);

        wind_down(name, self.inner.relay.shutdown_mode, self.inner.relay.drain_timeout(), &tracker, &sessions).await;
        result
    }
}

/// Apply the shutdown mode to the sessions still alive after accepting stopped.
async fn wind_down(
    name: &str,
    mode: ShutdownMode,
    drain_timeout: Duration,
    tracker: &SessionTracker,
    sessions: &CancellationToken,
) {
    let live = tracker.active_count();
    tracing::info!(listener = %name, live_sessions = live, mode = ?mode, "MQTT listener stopping");

    match mode {
        ShutdownMode::StopAccepting => {}
        ShutdownMode::Drain => {
            if tokio::time::timeout(drain_timeout, tracker.wait_idle()).await.is_err() {
                tracing::warn!(
                    listener = %name,
                    remaining = tracker.active_count(),
                    "Drain timeout elapsed, cancelling sessions"
                );
                sessions.cancel();
                tracker.wait_idle().await;
            }
        }
        ShutdownMode::Abort => {
            sessions.cancel();
            tracker.wait_idle().await;
        }
    }
}

/// Outcome of a bounded, cancellable connection step.
enum Step<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

async fn step<F: Future>(token: &CancellationToken, limit: Duration, fut: F) -> Step<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Step::Cancelled,
        out = tokio::time::timeout(limit, fut) => match out {
            Ok(value) => Step::Done(value),
            Err(_) => Step::TimedOut,
        },
    }
}

impl Inner {
    async fn handle(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        token: CancellationToken,
    ) -> Result<(), ConnectionError> {
        let _ = stream.set_nodelay(true);
        let handshake_timeout = self.relay.handshake_timeout();

        let client = match &self.tls {
            None => NetworkStream::Tcp(stream),
            Some(acceptor) => match step(&token, handshake_timeout, acceptor.accept(stream)).await {
                Step::Done(Ok(tls)) => NetworkStream::Tls(Box::new(tls)),
                Step::Done(Err(e)) => return Err(ConnectionError::Handshake(e.to_string())),
                Step::TimedOut => return Err(ConnectionError::Handshake("timed out".to_string())),
                Step::Cancelled => return Ok(()),
            },
        };

        let info = SessionInfo::new(self.name.as_str(), Some(peer_addr)).with_client_cert(client.peer_certificate());

        match self.transport {
            Transport::Tcp => {
                let Some(upstream) = self.dial(&token, TcpStream::connect(self.target.as_str())).await? else {
                    return Ok(());
                };
                let _ = upstream.set_nodelay(true);
                self.relay(info, client, upstream, token).await
            }
            Transport::WebSocket => {
                let client = match step(&token, handshake_timeout, websocket::accept(client, &self.path_prefix)).await {
                    Step::Done(Ok(ws)) => ws,
                    Step::Done(Err(e)) => return Err(ConnectionError::Upgrade(e.to_string())),
                    Step::TimedOut => return Err(ConnectionError::Upgrade("timed out".to_string())),
                    Step::Cancelled => return Ok(()),
                };
                let Some(upstream) = self.dial(&token, websocket::connect(&self.target)).await? else {
                    return Ok(());
                };
                self.relay(info, client, upstream, token).await
            }
        }
    }

    /// Connect to the target. `Ok(None)` means the session was cancelled first.
    async fn dial<F, T, E>(&self, token: &CancellationToken, connect: F) -> Result<Option<T>, ConnectionError>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let dial_error = |reason: String| ConnectionError::Dial {
            target: self.target.clone(),
            reason,
        };
        match step(token, self.relay.connect_timeout(), connect).await {
            Step::Done(Ok(upstream)) => Ok(Some(upstream)),
            Step::Done(Err(e)) => Err(dial_error(e.to_string())),
            Step::TimedOut => Err(dial_error("timed out".to_string())),
            Step::Cancelled => Ok(None),
        }
    }

    async fn relay<C, U>(
        &self,
        info: SessionInfo,
        client: C,
        upstream: U,
        token: CancellationToken,
    ) -> Result<(), ConnectionError>
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        U: AsyncRead + AsyncWrite + Send + 'static,
    {
        tracing::debug!(
            listener = %self.name,
            session_id = %info.id,
            peer_addr = ?info.peer_addr,
            target = %self.target,
            "Session established"
        );

        Session::new(info, client, upstream, Arc::clone(&self.handler))
            .with_interceptor(self.interceptor.clone())
            .with_veto_policy(self.relay.veto_policy)
            .with_max_packet_size(self.relay.max_packet_size)
            .run(token)
            .await
            .map_err(ConnectionError::from)
    }

    fn report(&self, peer_addr: SocketAddr, err: &ConnectionError) {
        metrics::record_connection_error(&self.name, err.kind());
        match err {
            ConnectionError::Session(SessionError::Io { .. }) => {
                tracing::debug!(listener = %self.name, %peer_addr, error = %err, "Session closed by I/O error");
            }
            ConnectionError::Session(SessionError::Vetoed { .. } | SessionError::Unauthorized { .. }) => {
                tracing::info!(listener = %self.name, %peer_addr, error = %err, "Session refused");
            }
            _ => {
                tracing::warn!(listener = %self.name, %peer_addr, kind = err.kind(), error = %err, "Connection failed");
            }
        }
    }
}
