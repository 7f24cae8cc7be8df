//! HTTP reverse proxy listener.
//!
//! # Responsibilities
//! - Serve one listener slot over HTTP or HTTPS (optionally mTLS)
//! - Refuse paths outside the listener prefix
//! - Authenticate and authorize each request through the handler
//! - Forward requests to the target, rewriting the path under its base path
//!
//! # Data Flow
//! ```text
//! request ─▶ prefix check (404) ─▶ auth_connect (401) ─▶ body ─▶ auth_publish (403)
//!         ─▶ publish notification ─▶ rewrite URI ─▶ target (502 on failure) ─▶ response
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode, Uri, Version},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use base64::Engine;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use rustls::ServerConfig;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use url::Url;

use crate::config::{ConfigError, HttpConfig, ListenerSpec, RelayConfig, ShutdownMode, ValidationError};
use crate::net::{strip_path_prefix, tls, ListenerError};
use crate::observability::metrics;
use crate::session::{Handler, SessionInfo};

/// Application state injected into handlers.
#[derive(Clone)]
struct ProxyState {
    listener: Arc<str>,
    path_prefix: Arc<str>,
    target: Arc<Url>,
    client: Client<HttpConnector, Body>,
    handler: Arc<dyn Handler>,
    max_body_size: usize,
}

/// HTTP proxy bound to one listener slot.
pub struct HttpProxy {
    name: String,
    address: String,
    tls: Option<Arc<ServerConfig>>,
    router: Router,
    shutdown_mode: ShutdownMode,
    drain_timeout: Duration,
    handle: Handle,
}

impl HttpProxy {
    /// Build a proxy for an `http` listener, loading its TLS material.
    pub fn new(
        spec: &ListenerSpec,
        http: &HttpConfig,
        relay: &RelayConfig,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, ConfigError> {
        let target = Url::parse(&spec.target).map_err(|e| {
            ConfigError::Validation(vec![ValidationError {
                listener: spec.name.clone(),
                field: "target",
                message: e.to_string(),
            }])
        })?;

        let tls = spec
            .tls
            .as_ref()
            .map(|t| tls::build_server_config(t, &[b"h2", b"http/1.1"]))
            .transpose()?;

        let state = ProxyState {
            listener: spec.name.as_str().into(),
            path_prefix: spec.path_prefix.as_str().into(),
            target: Arc::new(target),
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            handler,
            max_body_size: http.max_body_size,
        };

        Ok(Self {
            name: spec.name.clone(),
            address: spec.address.clone(),
            tls,
            router: build_router(http, state),
            shutdown_mode: relay.shutdown_mode,
            drain_timeout: relay.drain_timeout(),
            handle: Handle::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server handle, e.g. to learn the bound address.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Serve until `shutdown` fires.
    ///
    /// In-flight requests get up to the drain timeout unless the shutdown mode
    /// is `abort`.
    pub async fn listen(&self, shutdown: CancellationToken) -> Result<(), ListenerError> {
        let addr: SocketAddr = self.address.parse().map_err(|e| ListenerError::Bind {
            address: self.address.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        })?;

        let watcher = tokio::spawn({
            let handle = self.handle.clone();
            let name = self.name.clone();
            let mode = self.shutdown_mode;
            let drain_timeout = self.drain_timeout;
            async move {
                shutdown.cancelled().await;
                tracing::info!(listener = %name, mode = ?mode, "HTTP proxy stopping");
                match mode {
                    ShutdownMode::Abort => handle.shutdown(),
                    ShutdownMode::StopAccepting | ShutdownMode::Drain => handle.graceful_shutdown(Some(drain_timeout)),
                }
            }
        });

        tracing::info!(
            listener = %self.name,
            address = %addr,
            tls = self.tls.is_some(),
            "HTTP proxy listening"
        );

        let app = self.router.clone().into_make_service_with_connect_info::<SocketAddr>();
        let served = match &self.tls {
            None => axum_server::bind(addr).handle(self.handle.clone()).serve(app).await,
            Some(config) => {
                axum_server::bind_rustls(addr, RustlsConfig::from_config(Arc::clone(config)))
                    .handle(self.handle.clone())
                    .serve(app)
                    .await
            }
        };
        watcher.abort();

        served.map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse | std::io::ErrorKind::AddrNotAvailable | std::io::ErrorKind::PermissionDenied => {
                ListenerError::Bind {
                    address: self.address.clone(),
                    source: e,
                }
            }
            _ => ListenerError::Accept(e),
        })
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
fn build_router(http: &HttpConfig, state: ProxyState) -> Router {
    let max_body_size = state.max_body_size;
    Router::new()
        .route("/", any(proxy_handler))
        .route("/{*path}", any(proxy_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(RequestBodyLimitLayer::new(max_body_size))
                // innermost: its 408 needs a `Default` response body
                .layer(TimeoutLayer::new(Duration::from_secs(http.request_timeout_secs))),
        )
}

async fn proxy_handler(
    State(state): State<ProxyState>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let response = forward(&state, peer_addr, request).await;
    metrics::record_http_request(response.status().as_u16());
    response
}

async fn forward(state: &ProxyState, peer_addr: SocketAddr, request: Request<Body>) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let path = request.uri().path().to_string();

    let Some(rest) = strip_path_prefix(&path, &state.path_prefix) else {
        tracing::debug!(request_id = %request_id, path = %path, "Path outside prefix");
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };

    let mut info = SessionInfo::new(state.listener.as_ref(), Some(peer_addr));
    if let Some((username, password)) = credentials(request.headers()) {
        info.username = username;
        info.password = password;
    }

    if let Err(error) = state.handler.auth_connect(&info).await {
        tracing::info!(request_id = %request_id, %peer_addr, %error, "Request not authenticated");
        return (StatusCode::UNAUTHORIZED, error.to_string()).into_response();
    }

    let (mut parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(body) => body,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response(),
    };

    let topic = parts.uri.path_and_query().map_or("/", |pq| pq.as_str()).to_string();
    if let Err(error) = state.handler.auth_publish(&info, &topic, &body).await {
        tracing::info!(request_id = %request_id, %peer_addr, topic = %topic, %error, "Request not authorized");
        return (StatusCode::FORBIDDEN, error.to_string()).into_response();
    }
    if let Err(error) = state.handler.publish(&info, &topic, &body).await {
        tracing::warn!(request_id = %request_id, %error, "Handler notification failed");
    }

    let uri = match upstream_uri(&state.target, rest, parts.uri.query()) {
        Ok(uri) => uri,
        Err(error) => {
            tracing::warn!(request_id = %request_id, path = %path, %error, "Cannot rewrite request URI");
            return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };

    parts.uri = uri;
    parts.version = Version::HTTP_11;
    parts.headers.remove(header::HOST);
    strip_hop_by_hop(&mut parts.headers);
    if let Ok(forwarded) = HeaderValue::from_str(&peer_addr.ip().to_string()) {
        parts.headers.append("x-forwarded-for", forwarded);
    }

    tracing::debug!(request_id = %request_id, method = %parts.method, upstream = %parts.uri, "Proxying request");

    match state.client.request(Request::from_parts(parts, Body::from(body))).await {
        Ok(response) => {
            let (mut parts, body): (_, hyper::body::Incoming) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, Body::new(body))
        }
        Err(error) => {
            tracing::warn!(request_id = %request_id, target = %state.target, %error, "Upstream error");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

/// Username and password from `Authorization`.
///
/// Basic credentials are decoded; any other scheme is passed through whole as
/// the password, which lets token based handlers inspect it.
fn credentials(headers: &HeaderMap) -> Option<(String, Vec<u8>)> {
    let value = headers.get(header::AUTHORIZATION)?;
    let basic = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|encoded| base64::engine::general_purpose::STANDARD.decode(encoded.trim()).ok())
        .and_then(|decoded| String::from_utf8(decoded).ok());

    match basic.as_deref().and_then(|d| d.split_once(':')) {
        Some((user, pass)) => Some((user.to_string(), pass.as_bytes().to_vec())),
        None => Some((String::new(), value.as_bytes().to_vec())),
    }
}

/// Headers that describe one connection and must not cross the proxy.
const HOP_BY_HOP: [header::HeaderName; 7] = [
    header::CONNECTION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
];

/// Remove hop-by-hop headers, including any named in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in named {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}

/// Target URI for a request path with the listener prefix already removed.
fn upstream_uri(target: &Url, rest: &str, query: Option<&str>) -> Result<Uri, axum::http::uri::InvalidUri> {
    let base = target.path().trim_end_matches('/');
    let rest = rest.trim_start_matches('/');
    let path = match (base.is_empty(), rest.is_empty()) {
        (true, true) => "/".to_string(),
        (false, true) => base.to_string(),
        _ => format!("{base}/{rest}"),
    };

    let origin = &target[..url::Position::BeforePath];
    match query {
        Some(q) => format!("{origin}{path}?{q}").parse(),
        None => format!("{origin}{path}").parse(),
    }
}
