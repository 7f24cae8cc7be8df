//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, timeout, body limit)
//!     → handler authentication and authorization
//!     → path rewrite under the target base path
//!     → hyper client to the target
//!     → response streamed back to the client
//! ```

pub mod server;

pub use server::HttpProxy;
