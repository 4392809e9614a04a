//! MQTT 3.1.1 protocol implementation for embedded systems.
//!
//! - [`client`]: the wire-level client, usable on its own
//! - [`transport`]: [`MqttTransport`], the [`Transport`](crate::network::Transport)
//!   implementation the session layer drives

/// MQTT client implementation and supporting types.
pub mod client;

/// The session-layer adapter.
pub mod transport;

pub use client::{Client, Options, PublishPacket, QoS};
pub use transport::MqttTransport;
