//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGINT/SIGTERM/SIGABRT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → every listener stops accepting → shutdown mode decides live sessions
//!
//! Supervision (supervisor.rs):
//!     listener fails → trigger shutdown → wait for the rest → report first failure
//! ```
//!
//! # Design Decisions
//! - One shutdown token for the whole process
//! - A failing listener takes the gateway down; a failing connection never does

pub mod shutdown;
pub mod signals;
pub mod supervisor;

pub use shutdown::Shutdown;
pub use supervisor::{GatewayError, Supervisor};
