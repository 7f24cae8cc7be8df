//! MQTT proxy listeners.
//!
//! One [`MqttProxy`] per `mqtt` or `mqtt_ws` listener slot. The HTTP proxy
//! lives in [`crate::http`].

pub mod mqtt;

pub use mqtt::{ConnectionError, MqttProxy, Transport};
