//! A network abstraction layer for embedded systems
//!
//! Three layers live here, from the wire upwards:
//!
//! - [`Read`], [`Write`], [`Close`], [`Connection`] and [`Connect`] describe
//!   a byte stream and how to open one. The platform's TCP stack implements
//!   them.
//! - [`application::mqtt`] speaks MQTT 3.1.1 over any [`Connection`] and
//!   adapts it to the [`Transport`] trait.
//! - [`session`] owns the broker session on top of any [`Transport`]:
//!   reconnect with backoff, presence announcement, resubscription.

#![deny(unsafe_code)]

/// Common error types for network operations
pub mod error;

/// Application layer protocols
pub mod application;

/// The broker transport seam
pub mod transport;

/// Broker session lifecycle
pub mod session;

pub use transport::{Credentials, DisconnectReason, InboundMessage, MessageHandler, Transport};

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Close, Connect, Connection, MessageHandler, Read, Transport, Write};
}

/// Byte-stream input.
///
/// Reads should block for at most a short, platform-chosen timeout. A read
/// that times out with nothing received reports [`error::Error::Timeout`];
/// `Ok(0)` means the peer closed the stream.
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug + Into<error::Error>;
    /// Read data from the connection
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Byte-stream output.
pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// Orderly shutdown of a connection.
pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A synchronous connection
pub trait Connection: Read + Write + Close {}

/// A synchronous connector (client)
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Open a connection
    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error>;
}
