//! # Application Layer Network Protocols
//!
//! Protocol clients that run over any [`Connection`](crate::network::Connection).
//! They use fixed-size buffers only and report failures through
//! [`network::error::Error`](crate::network::error::Error).

/// MQTT client implementation.
///
/// Provides an MQTT 3.1.1 client for lightweight publish-subscribe messaging,
/// and its [`Transport`](crate::network::Transport) adapter.
pub mod mqtt;
