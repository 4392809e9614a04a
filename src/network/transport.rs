//! The seam between a broker session and the client library underneath.
//!
//! [`ConnectionManager`](super::session::ConnectionManager) only ever talks to
//! a [`Transport`]. The crate's own MQTT client implements it through
//! [`MqttTransport`](super::application::mqtt::MqttTransport); tests and
//! other client libraries implement it directly.

use heapless::{String, Vec};

/// Longest topic accepted on an inbound message.
pub const MAX_INBOUND_TOPIC_LEN: usize = 256;
/// Largest inbound payload.
pub const MAX_PAYLOAD_LEN: usize = 1024;
/// Longest username or password.
pub const MAX_CREDENTIAL_LEN: usize = 64;

/// Why the transport is not connected.
///
/// The numeric codes follow the widespread Arduino PubSubClient convention:
/// negative values are transport-level failures, positive values are the
/// broker's CONNACK refusal codes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DisconnectReason {
    /// The broker did not answer in time.
    ConnectionTimeout,
    /// The connection dropped after being established.
    ConnectionLost,
    /// The network connection could not be opened.
    ConnectFailed,
    /// Disconnected cleanly, or never connected.
    Disconnected,
    /// The broker does not speak this protocol version.
    BadProtocol,
    /// The broker rejected the client identifier.
    BadClientId,
    /// The broker is unavailable.
    Unavailable,
    /// Wrong username or password.
    BadCredentials,
    /// The client is not authorized to connect.
    Unauthorized,
}

impl DisconnectReason {
    /// The numeric state code.
    pub fn code(self) -> i8 {
        match self {
            DisconnectReason::ConnectionTimeout => -4,
            DisconnectReason::ConnectionLost => -3,
            DisconnectReason::ConnectFailed => -2,
            DisconnectReason::Disconnected => -1,
            DisconnectReason::BadProtocol => 1,
            DisconnectReason::BadClientId => 2,
            DisconnectReason::Unavailable => 3,
            DisconnectReason::BadCredentials => 4,
            DisconnectReason::Unauthorized => 5,
        }
    }

    /// Reason for a CONNACK refusal code. `None` for `0` (accepted) and
    /// codes outside the protocol.
    pub fn from_connack(code: u8) -> Option<Self> {
        match code {
            1 => Some(DisconnectReason::BadProtocol),
            2 => Some(DisconnectReason::BadClientId),
            3 => Some(DisconnectReason::Unavailable),
            4 => Some(DisconnectReason::BadCredentials),
            5 => Some(DisconnectReason::Unauthorized),
            _ => None,
        }
    }
}

impl core::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            DisconnectReason::ConnectionTimeout => "connection timeout",
            DisconnectReason::ConnectionLost => "connection lost",
            DisconnectReason::ConnectFailed => "connect failed",
            DisconnectReason::Disconnected => "disconnected",
            DisconnectReason::BadProtocol => "bad protocol",
            DisconnectReason::BadClientId => "bad client id",
            DisconnectReason::Unavailable => "broker unavailable",
            DisconnectReason::BadCredentials => "bad credentials",
            DisconnectReason::Unauthorized => "unauthorized",
        };
        write!(f, "{} ({})", msg, self.code())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for DisconnectReason {
    fn format(&self, f: defmt::Formatter) {
        match self {
            DisconnectReason::ConnectionTimeout => defmt::write!(f, "ConnectionTimeout"),
            DisconnectReason::ConnectionLost => defmt::write!(f, "ConnectionLost"),
            DisconnectReason::ConnectFailed => defmt::write!(f, "ConnectFailed"),
            DisconnectReason::Disconnected => defmt::write!(f, "Disconnected"),
            DisconnectReason::BadProtocol => defmt::write!(f, "BadProtocol"),
            DisconnectReason::BadClientId => defmt::write!(f, "BadClientId"),
            DisconnectReason::Unavailable => defmt::write!(f, "Unavailable"),
            DisconnectReason::BadCredentials => defmt::write!(f, "BadCredentials"),
            DisconnectReason::Unauthorized => defmt::write!(f, "Unauthorized"),
        }
    }
}

/// Broker login. Either both parts are present or there are no credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String<MAX_CREDENTIAL_LEN>,
    password: String<MAX_CREDENTIAL_LEN>,
}

impl Credentials {
    /// `None` if either part is longer than [`MAX_CREDENTIAL_LEN`].
    pub fn new(username: &str, password: &str) -> Option<Self> {
        Some(Self {
            username: String::try_from(username).ok()?,
            password: String::try_from(password).ok()?,
        })
    }

    /// Credentials from optional parts, as read from configuration.
    ///
    /// A missing or empty part means anonymous login: the result is `None`
    /// unless both are present.
    ///
    /// ```rust
    /// use nodehelper::network::Credentials;
    ///
    /// assert!(Credentials::from_parts(Some("user"), Some("secret")).is_some());
    /// assert!(Credentials::from_parts(Some("user"), None).is_none());
    /// assert!(Credentials::from_parts(Some("user"), Some("")).is_none());
    /// ```
    pub fn from_parts(username: Option<&str>, password: Option<&str>) -> Option<Self> {
        match (username, password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Self::new(u, p),
            _ => None,
        }
    }

    /// The username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The password.
    pub fn password(&self) -> &str {
        &self.password
    }
}

/// A message delivered by the broker.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct InboundMessage {
    /// Topic the message was published on.
    pub topic: String<MAX_INBOUND_TOPIC_LEN>,
    /// Raw payload.
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

/// Receiver of inbound messages.
///
/// Implemented for every `FnMut(&str, &[u8])` closure.
pub trait MessageHandler {
    /// Handle one message.
    fn on_message(&mut self, topic: &str, payload: &[u8]);
}

impl<F: FnMut(&str, &[u8])> MessageHandler for F {
    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        self(topic, payload)
    }
}

/// A publish/subscribe client as seen by the session layer.
///
/// Methods report failure the way embedded client libraries usually do:
/// `bool` for fire-and-forget requests, a [`DisconnectReason`] when the
/// connection itself is gone.
pub trait Transport {
    /// Open the connection and perform the broker handshake.
    fn connect(
        &mut self,
        client_id: &str,
        credentials: Option<&Credentials>,
    ) -> Result<(), DisconnectReason>;

    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool;

    /// Publish at most once. `false` if the request could not be sent.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool;

    /// Request a subscription to `topic`. `false` if the request could not be
    /// sent. The broker's acknowledgement may arrive on a later [`poll`](Self::poll).
    fn subscribe(&mut self, topic: &str) -> bool;

    /// Service the connection and return one buffered inbound message.
    ///
    /// `Ok(None)` when nothing is pending. An error means the connection is
    /// gone.
    fn poll(&mut self) -> Result<Option<InboundMessage>, DisconnectReason>;

    /// Why the transport is not connected.
    fn disconnect_reason(&self) -> DisconnectReason;

    /// Local network address, if known.
    fn local_address(&self) -> Option<&str> {
        None
    }
}
