//! Listener supervision.
//!
//! # Responsibilities
//! - Run every listener as its own task
//! - Stop all listeners when one of them fails
//! - Wait for every listener before reporting the first failure

use std::future::Future;

use thiserror::Error;
use tokio::task::JoinSet;

use crate::lifecycle::Shutdown;
use crate::net::ListenerError;

/// Why the gateway stopped abnormally.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no listener could be started")]
    NoListeners,

    #[error("listener '{name}' failed: {source}")]
    Listener {
        name: String,
        #[source]
        source: ListenerError,
    },

    #[error("listener task failed: {0}")]
    Task(String),
}

/// Owns the listener tasks of one gateway run.
pub struct Supervisor {
    tasks: JoinSet<(String, Result<(), ListenerError>)>,
    shutdown: Shutdown,
}

impl Supervisor {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            tasks: JoinSet::new(),
            shutdown,
        }
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, listener: F)
    where
        F: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        let name = name.into();
        self.tasks.spawn(async move { (name, listener.await) });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every listener. The first failure triggers shutdown for the
    /// rest and is returned once they have all stopped.
    pub async fn wait(mut self) -> Result<(), GatewayError> {
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            let error = match joined {
                Ok((name, Ok(()))) => {
                    tracing::debug!(listener = %name, "Listener stopped");
                    continue;
                }
                Ok((name, Err(source))) => GatewayError::Listener { name, source },
                Err(e) => GatewayError::Task(e.to_string()),
            };

            if first_error.is_none() {
                tracing::error!(%error, "Listener failed, stopping the others");
                self.shutdown.trigger();
                first_error = Some(error);
            } else {
                tracing::debug!(%error, "Further listener failure");
            }
        }

        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }
}
