//! Gateway composition: the declarative listener list turned into running tasks.
//!
//! # Data Flow
//! ```text
//! GatewayConfig.listeners
//!     ├─ mqtt / mqtt_ws ─▶ MqttProxy::new ─▶ listen(shutdown) ─┐
//!     └─ http           ─▶ HttpProxy::new ─▶ listen(shutdown) ─┴─▶ Supervisor::wait
//! ```
//!
//! A listener whose construction fails (unreadable TLS material, for example)
//! is logged and skipped. The run fails only when nothing could start.

use std::sync::Arc;

use crate::config::{GatewayConfig, Protocol};
use crate::http::HttpProxy;
use crate::lifecycle::{GatewayError, Shutdown, Supervisor};
use crate::proxy::MqttProxy;
use crate::session::{Handler, Interceptor};

pub struct Gateway {
    config: GatewayConfig,
    handler: Arc<dyn Handler>,
    interceptor: Option<Arc<dyn Interceptor>>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, handler: Arc<dyn Handler>) -> Self {
        Self {
            config,
            handler,
            interceptor: None,
        }
    }

    /// Install one interceptor shared by every MQTT session.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Start every listener and run until shutdown or the first listener failure.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), GatewayError> {
        let mut supervisor = Supervisor::new(shutdown.clone());

        for spec in &self.config.listeners {
            let token = shutdown.subscribe();
            let started = match spec.protocol {
                Protocol::Mqtt | Protocol::MqttWs => MqttProxy::new(
                    spec,
                    self.config.relay.clone(),
                    Arc::clone(&self.handler),
                    self.interceptor.clone(),
                )
                .map(|proxy| supervisor.spawn(spec.name.clone(), async move { proxy.listen(token).await })),
                Protocol::Http => HttpProxy::new(spec, &self.config.http, &self.config.relay, Arc::clone(&self.handler))
                    .map(|proxy| supervisor.spawn(spec.name.clone(), async move { proxy.listen(token).await })),
            };

            match started {
                Ok(()) => tracing::debug!(
                    listener = %spec.name,
                    protocol = %spec.protocol,
                    tls = spec.tls_mode().as_str(),
                    "Listener started"
                ),
                Err(error) => tracing::error!(listener = %spec.name, %error, "Listener skipped"),
            }
        }

        if supervisor.is_empty() {
            return Err(GatewayError::NoListeners);
        }
        tracing::info!(listeners = supervisor.len(), "Gateway running");
        supervisor.wait().await
    }
}
