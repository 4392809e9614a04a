//! [`Transport`] on top of the crate's MQTT client.

use super::client::{Client, Options, QoS};
use crate::network::error::Error;
use crate::network::{Connect, Credentials, DisconnectReason, InboundMessage, Transport};
use crate::system::Clock;
use heapless::String;

/// Longest broker address, e.g. `broker.example.com:1883`.
pub const MAX_BROKER_LEN: usize = 64;
/// Longest textual local address (an IPv6 address fits).
pub const MAX_ADDRESS_LEN: usize = 46;
/// Keep-alive announced to the broker unless overridden.
pub const DEFAULT_KEEP_ALIVE_SECONDS: u16 = 15;

/// Connects to one broker through a [`Connect`] implementation and speaks
/// MQTT 3.1.1 over the resulting connection.
///
/// Every [`connect`](Transport::connect) opens a fresh network connection;
/// a failed or dropped session is discarded entirely. Publishes and
/// subscriptions use QoS 0.
///
/// The clock drives the MQTT keep-alive. It can be shared with the
/// [`ConnectionManager`](crate::network::session::ConnectionManager) by
/// passing a reference.
///
/// # Examples
///
/// ```rust,ignore
/// use nodehelper::network::application::mqtt::MqttTransport;
///
/// let mut transport = MqttTransport::new(tcp_stack, &clock, "192.168.1.10:1883")?;
/// transport.set_local_address("192.168.1.42");
/// let manager = ConnectionManager::new(&identity, transport, &clock);
/// ```
pub struct MqttTransport<N: Connect, K: Clock> {
    connector: N,
    clock: K,
    broker: String<MAX_BROKER_LEN>,
    keep_alive_seconds: u16,
    client: Option<Client<N::Connection>>,
    reason: DisconnectReason,
    local_address: Option<String<MAX_ADDRESS_LEN>>,
}

impl<N: Connect, K: Clock> core::fmt::Debug for MqttTransport<N, K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("broker", &self.broker)
            .field("connected", &self.is_connected())
            .field("reason", &self.reason)
            .finish()
    }
}

impl<N: Connect, K: Clock> MqttTransport<N, K> {
    /// Transport for the broker at `broker`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`] if the address is empty or longer than
    /// [`MAX_BROKER_LEN`].
    pub fn new(connector: N, clock: K, broker: &str) -> Result<Self, Error> {
        if broker.is_empty() {
            return Err(Error::InvalidAddress);
        }
        Ok(Self {
            connector,
            clock,
            broker: String::try_from(broker).map_err(|_| Error::InvalidAddress)?,
            keep_alive_seconds: DEFAULT_KEEP_ALIVE_SECONDS,
            client: None,
            reason: DisconnectReason::Disconnected,
            local_address: None,
        })
    }

    /// Keep-alive interval announced on the next connect.
    pub fn with_keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive_seconds = seconds;
        self
    }

    /// Record the device's address, as reported in presence announcements.
    ///
    /// Addresses longer than [`MAX_ADDRESS_LEN`] are ignored.
    pub fn set_local_address(&mut self, address: &str) {
        self.local_address = String::try_from(address).ok();
    }

    /// The broker address.
    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// The live client, if connected.
    pub fn client(&self) -> Option<&Client<N::Connection>> {
        self.client.as_ref()
    }

    /// The connector, e.g. to reconfigure the network stack.
    pub fn connector_mut(&mut self) -> &mut N {
        &mut self.connector
    }

    /// Close the session cleanly.
    pub fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            if client.disconnect().is_err() {
                debug!("mqtt: unclean disconnect");
            }
        }
        self.reason = DisconnectReason::Disconnected;
    }

    fn drop_session(&mut self, error: Error) -> DisconnectReason {
        self.client = None;
        self.reason = match error {
            Error::Timeout => DisconnectReason::ConnectionTimeout,
            _ => DisconnectReason::ConnectionLost,
        };
        warn!("mqtt: session dropped: {}", error);
        self.reason
    }

    /// Drop the client if an operation left it disconnected.
    fn check_session<T>(&mut self, result: Result<T, Error>) -> bool {
        match result {
            Ok(_) => true,
            Err(e) => {
                if !self.is_connected() {
                    self.drop_session(e);
                }
                false
            }
        }
    }
}

fn refusal(error: Error) -> DisconnectReason {
    match error {
        Error::ConnectionRefused(code) => {
            DisconnectReason::from_connack(code).unwrap_or(DisconnectReason::ConnectFailed)
        }
        Error::Timeout => DisconnectReason::ConnectionTimeout,
        _ => DisconnectReason::ConnectFailed,
    }
}

impl<N: Connect, K: Clock> Transport for MqttTransport<N, K> {
    fn connect(
        &mut self,
        client_id: &str,
        credentials: Option<&Credentials>,
    ) -> Result<(), DisconnectReason> {
        self.client = None;

        let connection = match self.connector.connect(&self.broker) {
            Ok(connection) => connection,
            Err(_) => {
                self.reason = DisconnectReason::ConnectFailed;
                return Err(self.reason);
            }
        };

        let options = Options {
            client_id,
            keep_alive_seconds: self.keep_alive_seconds,
            clean_session: true,
            username: credentials.map(Credentials::username),
            password: credentials.map(Credentials::password),
        };
        match Client::connect(connection, options) {
            Ok(client) => {
                self.client = Some(client);
                Ok(())
            }
            Err(e) => {
                self.reason = refusal(e);
                Err(self.reason)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(Client::is_connected)
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        let Some(client) = self.client.as_mut() else {
            return false;
        };
        let result = client.publish(topic, payload, QoS::AtMostOnce);
        self.check_session(result)
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        let Some(client) = self.client.as_mut() else {
            return false;
        };
        let result = client.subscribe(topic, QoS::AtMostOnce);
        self.check_session(result)
    }

    fn poll(&mut self) -> Result<Option<InboundMessage>, DisconnectReason> {
        let Some(client) = self.client.as_mut() else {
            return Err(self.reason);
        };
        match client.poll(self.clock.now_ms()) {
            Ok(Some(packet)) => Ok(Some(InboundMessage {
                topic: packet.topic,
                payload: packet.payload,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(self.drop_session(e)),
        }
    }

    fn disconnect_reason(&self) -> DisconnectReason {
        self.reason
    }

    fn local_address(&self) -> Option<&str> {
        self.local_address.as_deref()
    }
}
