//! MQTT 3.1.1 client implementation for embedded systems.
//!
//! A small client over any [`Connection`]. It covers what a device that
//! reports status and listens for commands needs:
//!
//! - CONNECT with optional username/password and clean session
//! - PUBLISH at QoS 0 or 1
//! - SUBSCRIBE, with the SUBACK matched later by [`Client::poll`]
//! - receiving PUBLISH packets, acknowledging QoS 1 deliveries
//! - PINGREQ/PINGRESP keep-alive
//! - DISCONNECT
//!
//! Only [`Client::connect`] waits for the broker. Everything else returns
//! as soon as the bytes are written, and inbound traffic is handled by
//! polling. The connection's [`Read`] reports [`Error::Timeout`] when
//! nothing is pending and `Ok(0)` once the peer has closed the stream.
//!
//! All buffers are fixed-size. Packets that do not fit are rejected with
//! [`Error::BufferOverflow`] on the way out and skipped on the way in.
//!
//! # Examples
//!
//! ```rust,no_run
//! use nodehelper::network::application::mqtt::{Client, Options, QoS};
//! # use nodehelper::network::Connection;
//! # use nodehelper::network::error::Error;
//! # struct TcpConnection;
//! # impl Connection for TcpConnection {}
//! # impl nodehelper::network::Read for TcpConnection {
//! #     type Error = Error;
//! #     fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> { Err(Error::Timeout) }
//! # }
//! # impl nodehelper::network::Write for TcpConnection {
//! #     type Error = ();
//! #     fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> { Ok(buf.len()) }
//! #     fn flush(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # impl nodehelper::network::Close for TcpConnection {
//! #     type Error = ();
//! #     fn close(self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # fn now_ms() -> u64 { 0 }
//! # fn main() -> Result<(), Error> {
//! let options = Options {
//!     client_id: "esp8266-1234567",
//!     keep_alive_seconds: 60,
//!     clean_session: true,
//!     username: None,
//!     password: None,
//! };
//!
//! let mut client = Client::connect(TcpConnection, options)?;
//! client.subscribe("/raw/esp8266/1234567/in", QoS::AtMostOnce)?;
//! client.publish("/raw/esp8266/1234567/position", b"42", QoS::AtMostOnce)?;
//!
//! // Call regularly: this also keeps the session alive
//! while let Some(message) = client.poll(now_ms())? {
//!     // handle message.topic / message.payload
//! #   let _ = message;
//! }
//! # Ok(())
//! # }
//! ```

use crate::network::error::Error;
use crate::network::transport::{MAX_INBOUND_TOPIC_LEN, MAX_PAYLOAD_LEN};
use crate::network::{Connection, Read, Write};
use heapless::{String, Vec};

// MQTT Control Packet types - these are the fixed header packet type values
const CONNECT: u8 = 0x10;
const CONNACK: u8 = 0x20;
const PUBLISH: u8 = 0x30;
const PUBACK: u8 = 0x40;
const SUBSCRIBE: u8 = 0x82;
const SUBACK: u8 = 0x90;
const PINGREQ: u8 = 0xC0;
const PINGRESP: u8 = 0xD0;
const DISCONNECT: u8 = 0xE0;

// Protocol constants defined by MQTT 3.1.1 specification
const PROTOCOL_NAME: &[u8] = b"MQTT";
const PROTOCOL_LEVEL: u8 = 4; // MQTT 3.1.1

const FLAG_USERNAME: u8 = 0x80;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_CLEAN_SESSION: u8 = 0x02;

const SUBACK_FAILURE: u8 = 0x80;

/// Largest packet body (everything after the fixed header) this client
/// handles.
pub const MAX_PACKET_LEN: usize = 2 + MAX_INBOUND_TOPIC_LEN + 2 + MAX_PAYLOAD_LEN;

/// Subscriptions that may wait for their SUBACK at the same time.
pub const MAX_PENDING_SUBSCRIPTIONS: usize = 8;

/// Packets handled by one [`Client::poll`] before it returns.
const MAX_PACKETS_PER_POLL: usize = 16;

/// An MQTT PUBLISH message received from the broker.
///
/// # Examples
///
/// ```rust
/// use nodehelper::network::application::mqtt::PublishPacket;
/// use heapless::{String, Vec};
///
/// let packet = PublishPacket {
///     topic: String::try_from("/raw/esp8266/1/in").unwrap(),
///     payload: Vec::from_slice(b"50").unwrap(),
/// };
///
/// assert_eq!(packet.topic.as_str(), "/raw/esp8266/1/in");
/// assert_eq!(&packet.payload[..], b"50");
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PublishPacket {
    /// The topic this message was published to.
    pub topic: String<MAX_INBOUND_TOPIC_LEN>,

    /// The message payload.
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

/// MQTT Quality of Service levels.
///
/// Only the two levels that need no persistent session state are
/// supported.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QoS {
    /// **QoS 0**: fire and forget.
    AtMostOnce = 0,

    /// **QoS 1**: acknowledged delivery; duplicates are possible.
    AtLeastOnce = 1,
}

/// Configuration options for MQTT client connection.
///
/// A password is only sent together with a username.
#[derive(Debug, Clone)]
pub struct Options<'a> {
    /// Client identifier presented to the broker.
    ///
    /// Must be unique per broker; a second client with the same id takes
    /// over the session.
    pub client_id: &'a str,

    /// Keep-alive interval in seconds, `0` to disable.
    pub keep_alive_seconds: u16,

    /// Whether the broker should discard any previous session state.
    pub clean_session: bool,

    /// Login name, if the broker requires authentication.
    pub username: Option<&'a str>,

    /// Password, sent only together with [`username`](Self::username).
    pub password: Option<&'a str>,
}

enum Incoming {
    Publish(PublishPacket),
    SubAck { packet_id: u16, return_code: u8 },
    PingResp,
    Other,
}

/// An MQTT 3.1.1 client for publish-subscribe messaging.
///
/// `Client` owns the connection. A client only exists while the session is
/// up: [`connect`](Self::connect) hands back a connected client, and a
/// failed I/O operation marks it disconnected for good. Open a new
/// connection to start over.
///
/// The client has no clock of its own. [`poll`](Self::poll) takes the
/// current time and sends a PINGREQ once a keep-alive interval passes
/// without outgoing traffic. If the PINGRESP is still missing one interval
/// later the session is considered dead.
#[derive(Debug)]
pub struct Client<C: Connection> {
    connection: C,
    is_connected: bool,
    next_packet_id: u16,
    keep_alive_ms: u64,
    // Time of the last poll that saw outgoing traffic
    last_sent_ms: u64,
    sent_since_poll: bool,
    ping_sent_at: Option<u64>,
    awaiting_suback: Vec<u16, MAX_PENDING_SUBSCRIPTIONS>,
    rejected_subscriptions: usize,
}

impl<C: Connection> Client<C> {
    /// Establish an MQTT connection with the broker.
    ///
    /// Sends CONNECT and waits for the CONNACK.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionRefused`] with the broker's return code
    /// - [`Error::ConnectionClosed`] if the peer hangs up before answering
    /// - [`Error::Timeout`] if the CONNACK does not arrive within the
    ///   connection's read timeout
    /// - [`Error::ProtocolError`] for anything that is not a CONNACK
    /// - [`Error::BufferOverflow`] if the identifier or credentials are too
    ///   long for a packet
    pub fn connect(mut connection: C, options: Options) -> Result<Self, Error> {
        // --- Variable Header ---
        let mut vh: Vec<u8, 10> = Vec::new();
        put_bytes(&mut vh, &(PROTOCOL_NAME.len() as u16).to_be_bytes())?;
        put_bytes(&mut vh, PROTOCOL_NAME)?;

        let username = options.username;
        let password = username.and(options.password);
        let mut connect_flags = 0;
        if options.clean_session {
            connect_flags |= FLAG_CLEAN_SESSION;
        }
        if username.is_some() {
            connect_flags |= FLAG_USERNAME;
        }
        if password.is_some() {
            connect_flags |= FLAG_PASSWORD;
        }
        put_bytes(&mut vh, &[PROTOCOL_LEVEL, connect_flags])?;
        put_bytes(&mut vh, &options.keep_alive_seconds.to_be_bytes())?;

        // --- Payload ---
        let mut payload: Vec<u8, 256> = Vec::new();
        put_str(&mut payload, options.client_id)?;
        if let Some(username) = username {
            put_str(&mut payload, username)?;
        }
        if let Some(password) = password {
            put_str(&mut payload, password)?;
        }

        let mut body: Vec<u8, 266> = Vec::new();
        put_bytes(&mut body, &vh)?;
        put_bytes(&mut body, &payload)?;
        write_packet(&mut connection, CONNECT, &body)?;

        // Wait for and parse CONNACK
        let mut connack_buf = [0u8; 4];
        read_exact(&mut connection, &mut connack_buf)?;

        if connack_buf[0] != CONNACK || connack_buf[1] != 2 {
            return Err(Error::ProtocolError);
        }

        // Check connection acknowledgement status
        match connack_buf[3] {
            0 => Ok(Self {
                connection,
                is_connected: true,
                next_packet_id: 1,
                keep_alive_ms: u64::from(options.keep_alive_seconds) * 1000,
                last_sent_ms: 0,
                sent_since_poll: true,
                ping_sent_at: None,
                awaiting_suback: Vec::new(),
                rejected_subscriptions: 0,
            }),
            code @ 1..=5 => Err(Error::ConnectionRefused(code)),
            _ => Err(Error::ProtocolError),
        }
    }

    /// Whether the session is still usable.
    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    /// The underlying connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Subscriptions still waiting for their SUBACK.
    pub fn pending_subscriptions(&self) -> usize {
        self.awaiting_suback.len()
    }

    /// Subscriptions the broker answered with a failure code.
    pub fn rejected_subscriptions(&self) -> usize {
        self.rejected_subscriptions
    }

    /// Publish a message to `topic`.
    ///
    /// At [`QoS::AtLeastOnce`] the broker's PUBACK is not awaited; it is
    /// consumed by a later [`poll`](Self::poll).
    pub fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), Error> {
        self.ensure_connected()?;

        let mut packet: Vec<u8, MAX_PACKET_LEN> = Vec::new();
        // --- Variable Header ---
        put_str(&mut packet, topic)?;
        if qos == QoS::AtLeastOnce {
            let packet_id = self.packet_id();
            put_bytes(&mut packet, &packet_id.to_be_bytes())?;
        }
        // --- Payload ---
        put_bytes(&mut packet, payload)?;

        let header = PUBLISH | ((qos as u8) << 1);
        let result = self.send(header, &packet);
        self.track(result)
    }

    /// Send a SUBSCRIBE for `topic` and return its packet identifier.
    ///
    /// Does not wait for the SUBACK. [`poll`](Self::poll) matches it when it
    /// arrives; a rejection is logged and counted in
    /// [`rejected_subscriptions`](Self::rejected_subscriptions).
    ///
    /// # Errors
    ///
    /// [`Error::BufferOverflow`] if [`MAX_PENDING_SUBSCRIPTIONS`] are already
    /// waiting for their SUBACK. The session stays up.
    pub fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, Error> {
        self.ensure_connected()?;
        if self.awaiting_suback.is_full() {
            return Err(Error::BufferOverflow);
        }

        let packet_id = self.packet_id();
        let mut packet: Vec<u8, { MAX_INBOUND_TOPIC_LEN + 5 }> = Vec::new();
        // --- Variable Header (Packet Identifier) ---
        put_bytes(&mut packet, &packet_id.to_be_bytes())?;
        // --- Payload ---
        put_str(&mut packet, topic)?;
        put_bytes(&mut packet, &[qos as u8])?;

        let result = self.send(SUBSCRIBE, &packet);
        self.track(result)?;
        self.awaiting_suback
            .push(packet_id)
            .map_err(|_| Error::BufferOverflow)?;
        Ok(packet_id)
    }

    /// Handle pending inbound packets and return the next message, if any.
    ///
    /// Control packets (acknowledgements, ping responses) are consumed along
    /// the way, as are inbound messages too large for the buffers. Once the
    /// connection has nothing more to read the keep-alive is serviced with
    /// `now_ms` as the current time.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the broker closed the connection
    /// - [`Error::Timeout`] if a PINGRESP did not arrive in time, or a packet
    ///   stalled half way
    /// - [`Error::ReadError`] / [`Error::WriteError`] on I/O failures
    ///
    /// Any of these leaves the client disconnected.
    pub fn poll(&mut self, now_ms: u64) -> Result<Option<PublishPacket>, Error> {
        self.ensure_connected()?;
        let result = self.service(now_ms);
        self.track(result)
    }

    fn service(&mut self, now_ms: u64) -> Result<Option<PublishPacket>, Error> {
        for _ in 0..MAX_PACKETS_PER_POLL {
            match self.receive()? {
                Some(Incoming::Publish(message)) => {
                    self.keep_alive(now_ms)?;
                    return Ok(Some(message));
                }
                Some(Incoming::SubAck {
                    packet_id,
                    return_code,
                }) => self.acknowledge(packet_id, return_code),
                Some(Incoming::PingResp) => self.ping_sent_at = None,
                Some(Incoming::Other) => {}
                None => break,
            }
        }
        self.keep_alive(now_ms)?;
        Ok(None)
    }

    fn acknowledge(&mut self, packet_id: u16, return_code: u8) {
        let Some(index) = self.awaiting_suback.iter().position(|id| *id == packet_id) else {
            warn!("mqtt: unexpected SUBACK for packet {}", packet_id);
            return;
        };
        self.awaiting_suback.swap_remove(index);
        if return_code == SUBACK_FAILURE {
            self.rejected_subscriptions += 1;
            warn!("mqtt: subscription {} rejected", packet_id);
        }
    }

    fn keep_alive(&mut self, now_ms: u64) -> Result<(), Error> {
        if self.sent_since_poll {
            self.sent_since_poll = false;
            self.last_sent_ms = now_ms;
        }
        if self.keep_alive_ms == 0 {
            return Ok(());
        }

        if let Some(sent_at) = self.ping_sent_at {
            if now_ms.saturating_sub(sent_at) >= self.keep_alive_ms {
                warn!("mqtt: no PINGRESP within {} ms", self.keep_alive_ms);
                return Err(Error::Timeout);
            }
        } else if now_ms.saturating_sub(self.last_sent_ms) >= self.keep_alive_ms {
            self.send(PINGREQ, &[])?;
            trace!("mqtt: PINGREQ");
            self.sent_since_poll = false;
            self.last_sent_ms = now_ms;
            self.ping_sent_at = Some(now_ms);
        }
        Ok(())
    }

    /// Send DISCONNECT and close the connection.
    pub fn disconnect(mut self) -> Result<(), Error> {
        let sent = write_packet(&mut self.connection, DISCONNECT, &[]);
        let closed = self.connection.close().map_err(|_| Error::ConnectionClosed);
        sent.and(closed)
    }

    fn ensure_connected(&self) -> Result<(), Error> {
        if self.is_connected {
            Ok(())
        } else {
            Err(Error::NotOpen)
        }
    }

    fn track<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &result {
            // Oversized packets are rejected before anything hits the wire
            if *e != Error::BufferOverflow {
                self.is_connected = false;
            }
        }
        result
    }

    fn send(&mut self, header: u8, body: &[u8]) -> Result<(), Error> {
        write_packet(&mut self.connection, header, body)?;
        self.sent_since_poll = true;
        Ok(())
    }

    fn packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    fn receive(&mut self) -> Result<Option<Incoming>, Error> {
        let mut header = [0u8; 1];
        match self.connection.read(&mut header) {
            Ok(0) => return Err(Error::ConnectionClosed),
            Ok(_) => {}
            Err(e) => {
                return match read_failure(e) {
                    Error::Timeout => Ok(None),
                    error => Err(error),
                };
            }
        }

        let remaining_len = read_remaining_length(&mut self.connection)?;
        if remaining_len > MAX_PACKET_LEN {
            discard(&mut self.connection, remaining_len)?;
            warn!("mqtt: skipped {} byte packet", remaining_len);
            return Ok(Some(Incoming::Other));
        }

        let mut body = [0u8; MAX_PACKET_LEN];
        let body = &mut body[..remaining_len];
        read_exact(&mut self.connection, body)?;

        match header[0] & 0xF0 {
            PUBLISH => self.parse_publish(header[0], body),
            SUBACK => {
                if body.len() < 3 {
                    return Err(Error::ProtocolError);
                }
                Ok(Some(Incoming::SubAck {
                    packet_id: u16::from_be_bytes([body[0], body[1]]),
                    return_code: body[2],
                }))
            }
            PINGRESP => Ok(Some(Incoming::PingResp)),
            _ => Ok(Some(Incoming::Other)),
        }
    }

    fn parse_publish(&mut self, header: u8, body: &[u8]) -> Result<Option<Incoming>, Error> {
        if body.len() < 2 {
            return Err(Error::ProtocolError);
        }
        let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
        let topic_end = 2 + topic_len;
        let topic_bytes = body.get(2..topic_end).ok_or(Error::ProtocolError)?;
        let topic = core::str::from_utf8(topic_bytes).map_err(|_| Error::ProtocolError)?;

        let payload_start = match (header >> 1) & 0x03 {
            0 => topic_end,
            1 => {
                let id = body
                    .get(topic_end..topic_end + 2)
                    .ok_or(Error::ProtocolError)?;
                self.send(PUBACK, id)?;
                topic_end + 2
            }
            _ => return Err(Error::ProtocolError),
        };

        let (Ok(topic), Ok(payload)) = (
            String::try_from(topic),
            Vec::from_slice(&body[payload_start..]),
        ) else {
            warn!("mqtt: dropped oversized message");
            return Ok(Some(Incoming::Other));
        };
        Ok(Some(Incoming::Publish(PublishPacket { topic, payload })))
    }
}

fn put_bytes<const N: usize>(buf: &mut Vec<u8, N>, bytes: &[u8]) -> Result<(), Error> {
    buf.extend_from_slice(bytes)
        .map_err(|_| Error::BufferOverflow)
}

fn put_str<const N: usize>(buf: &mut Vec<u8, N>, s: &str) -> Result<(), Error> {
    let len = u16::try_from(s.len()).map_err(|_| Error::BufferOverflow)?;
    put_bytes(buf, &len.to_be_bytes())?;
    put_bytes(buf, s.as_bytes())
}

fn write_all<C: Write>(connection: &mut C, mut buf: &[u8]) -> Result<(), Error> {
    while !buf.is_empty() {
        match connection.write(buf) {
            Ok(0) | Err(_) => return Err(Error::WriteError),
            Ok(n) => buf = &buf[n..],
        }
    }
    Ok(())
}

fn write_packet<C: Write>(connection: &mut C, header: u8, body: &[u8]) -> Result<(), Error> {
    let mut fixed_header: Vec<u8, 5> = Vec::new();
    put_bytes(&mut fixed_header, &[header])?;
    encode_remaining_length(&mut fixed_header, body.len())?;

    write_all(connection, &fixed_header)?;
    write_all(connection, body)?;
    connection.flush().map_err(|_| Error::WriteError)
}

fn read_exact<C: Read>(connection: &mut C, buf: &mut [u8]) -> Result<(), Error> {
    let mut total_read = 0;
    while total_read < buf.len() {
        match connection.read(&mut buf[total_read..]) {
            Ok(0) => return Err(Error::ConnectionClosed),
            Ok(n) => total_read += n,
            Err(e) => return Err(read_failure(e)),
        }
    }
    Ok(())
}

/// A timeout stays a timeout, anything else is a failed read.
fn read_failure<E: Into<Error>>(error: E) -> Error {
    match error.into() {
        Error::Timeout => Error::Timeout,
        _ => Error::ReadError,
    }
}

fn discard<C: Read>(connection: &mut C, mut len: usize) -> Result<(), Error> {
    let mut chunk = [0u8; 64];
    while len > 0 {
        let n = len.min(chunk.len());
        read_exact(connection, &mut chunk[..n])?;
        len -= n;
    }
    Ok(())
}

fn read_remaining_length<C: Read>(connection: &mut C) -> Result<usize, Error> {
    let mut value = 0;
    let mut multiplier = 1;
    for _ in 0..4 {
        let mut byte = [0u8; 1];
        read_exact(connection, &mut byte)?;
        value += (byte[0] & 0x7F) as usize * multiplier;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        multiplier *= 128;
    }
    Err(Error::ProtocolError)
}

/// Encode `len` as an MQTT variable byte integer.
pub(crate) fn encode_remaining_length(buf: &mut Vec<u8, 5>, mut len: usize) -> Result<(), Error> {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte).map_err(|_| Error::BufferOverflow)?;
        if len == 0 {
            return Ok(());
        }
    }
}
