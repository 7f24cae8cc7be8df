//! MQTT framing subsystem.
//!
//! # Data Flow
//! ```text
//! byte stream (TCP / TLS / WebSocket)
//!     → codec.rs (fixed header + remaining length → one frame)
//!     → packet.rs (ControlPacket: exact framed bytes, typed view on demand)
//!     → session relay (intercept, forward)
//!     → codec.rs (frame bytes written unchanged)
//! ```
//!
//! # Design Decisions
//! - Only the fixed header is interpreted while relaying; bodies stay opaque
//! - Forwarded bytes are the bytes that were read, so pass-through is exact
//! - A typed view (MQTT 3.1 / 3.1.1 via `mqttrs`) is parsed only when asked for

pub mod codec;
pub mod packet;

pub use codec::{MqttCodec, MAX_REMAINING_LENGTH};
pub use packet::{ControlPacket, PacketError, PacketType};

/// Typed MQTT packets, re-exported so interceptors can build replacements.
pub use mqttrs;
