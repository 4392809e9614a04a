//! Broker session lifecycle.
//!
//! [`ConnectionManager`] keeps one broker session alive on behalf of the
//! device's control loop. The loop calls
//! [`reconnect`](ConnectionManager::reconnect) on every iteration; the call
//! either services the live session or makes progress towards a new one,
//! and always returns promptly.
//!
//! ```text
//!               reconnect()                  handshake ok
//! Disconnected ────────────▶ Connecting ──────────────────▶ Announcing
//!      ▲                         │                              │ register
//!      │ handshake failed        │                              ▼
//!      └─────────────────────────┘                         Subscribing
//!      ▲                                                        │ topics
//!      │ transport dropped                                      ▼
//!      └──────────────────────────────────────────────────── Connected
//! ```
//!
//! A failed handshake arms a retry deadline ([`ManagerConfig::backoff_ms`]);
//! calls before it return [`Error::RetryPending`] without touching the
//! broker. A session that drops after being established is retried at once.
//!
//! # Examples
//!
//! ```rust,no_run
//! use core::sync::atomic::AtomicBool;
//! use nodehelper::network::session::{ConnectionManager, SessionOptions};
//! use nodehelper::network::{Credentials, Transport};
//! use nodehelper::system::{Clock, Delay, Identity, Watchdog};
//!
//! fn control_loop<T: Transport, C: Clock>(
//!     transport: T,
//!     clock: C,
//!     delay: &mut impl Delay,
//!     watchdog: &mut impl Watchdog,
//! ) -> Result<(), nodehelper::network::session::Error> {
//!     let identity = Identity::from_chip_id("esp8266", 1_234_567).unwrap();
//!     let mut options = SessionOptions::new();
//!     options.credentials = Credentials::from_parts(Some("user"), Some("secret"));
//!     options.add_topic("/raw/esp8266/1234567/in")?;
//!
//!     let mut manager = ConnectionManager::new(&identity, transport, clock);
//!     let mut on_message = |topic: &str, payload: &[u8]| {
//!         // act on commands
//! #       let _ = (topic, payload);
//!     };
//!     let stop = AtomicBool::new(false);
//!     manager.run_until_connected(&options, &mut on_message, delay, watchdog, &stop)?;
//!
//!     loop {
//!         let _ = manager.reconnect(&options, &mut on_message);
//!         let _ = manager.publish_status("position", b"42");
//!         watchdog.feed();
//!     }
//! }
//! ```

use crate::network::{Credentials, DisconnectReason, MessageHandler, Transport};
use crate::system::identity::{Identity, Topic};
use crate::system::{Clock, Delay, Watchdog};
use core::sync::atomic::{AtomicBool, Ordering};
use heapless::Vec;
use serde::Serialize;

/// Maximum number of topics resubscribed after each handshake.
pub const MAX_TOPICS: usize = 8;
/// Inbound messages delivered per [`ConnectionManager::reconnect`] call.
pub const MAX_MESSAGES_PER_CALL: usize = 8;
/// Address announced when the transport does not know its own.
pub const UNKNOWN_ADDRESS: &str = "0.0.0.0";

const REGISTRATION_CAPACITY: usize = 128;

/// Where a session is in its lifecycle.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    /// No session. The next [`reconnect`](ConnectionManager::reconnect)
    /// attempts a handshake unless a retry is pending.
    Disconnected,
    /// Handshake with the broker in progress.
    Connecting,
    /// Announcing presence on the registration topic.
    Announcing,
    /// Restoring subscriptions.
    Subscribing,
    /// Session established; publishing is allowed.
    Connected,
}

impl State {
    /// Short name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Disconnected => "Disconnected",
            State::Connecting => "Connecting",
            State::Announcing => "Announcing",
            State::Subscribing => "Subscribing",
            State::Connected => "Connected",
        }
    }
}

impl core::fmt::Display for State {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for State {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=str}", self.as_str())
    }
}

/// Errors returned by [`ConnectionManager`] and [`SessionOptions`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// [`ConnectionManager::reconnect`] has never been called.
    NotReady,
    /// The session is not established, or was lost while servicing it.
    NotConnected,
    /// The broker handshake failed; a retry is scheduled.
    HandshakeFailed(DisconnectReason),
    /// A retry is scheduled in `remaining_ms` milliseconds.
    RetryPending {
        /// Time left until the next handshake attempt.
        remaining_ms: u64,
    },
    /// The transport did not accept the publish.
    PublishFailed,
    /// The cancellation flag was raised.
    Cancelled,
    /// A topic exceeds the topic buffer.
    TopicTooLong,
    /// A fixed-size collection is full.
    CapacityExceeded,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::NotReady => f.write_str("session not started"),
            Error::NotConnected => f.write_str("not connected"),
            Error::HandshakeFailed(reason) => write!(f, "handshake failed: {}", reason),
            Error::RetryPending { remaining_ms } => {
                write!(f, "retry in {} ms", remaining_ms)
            }
            Error::PublishFailed => f.write_str("publish failed"),
            Error::Cancelled => f.write_str("cancelled"),
            Error::TopicTooLong => f.write_str("topic too long"),
            Error::CapacityExceeded => f.write_str("capacity exceeded"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::NotReady => defmt::write!(f, "NotReady"),
            Error::NotConnected => defmt::write!(f, "NotConnected"),
            Error::HandshakeFailed(reason) => defmt::write!(f, "HandshakeFailed({})", reason),
            Error::RetryPending { remaining_ms } => {
                defmt::write!(f, "RetryPending({=u64} ms)", remaining_ms)
            }
            Error::PublishFailed => defmt::write!(f, "PublishFailed"),
            Error::Cancelled => defmt::write!(f, "Cancelled"),
            Error::TopicTooLong => defmt::write!(f, "TopicTooLong"),
            Error::CapacityExceeded => defmt::write!(f, "CapacityExceeded"),
        }
    }
}

/// What a session logs in with and listens to.
///
/// The default is an anonymous session without subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Broker login; `None` connects anonymously.
    pub credentials: Option<Credentials>,
    topics: Vec<Topic, MAX_TOPICS>,
}

impl SessionOptions {
    /// Anonymous, no topics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log in with `credentials`.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Add a topic to subscribe to after every handshake.
    ///
    /// Returns `false` if the topic was already present.
    ///
    /// # Errors
    ///
    /// [`Error::TopicTooLong`] or [`Error::CapacityExceeded`] past
    /// [`MAX_TOPICS`].
    pub fn add_topic(&mut self, topic: &str) -> Result<bool, Error> {
        if self.topics.iter().any(|t| t.as_str() == topic) {
            return Ok(false);
        }
        let topic = Topic::try_from(topic).map_err(|_| Error::TopicTooLong)?;
        self.topics
            .push(topic)
            .map_err(|_| Error::CapacityExceeded)?;
        Ok(true)
    }

    /// Builder form of [`add_topic`](Self::add_topic).
    pub fn with_topic(mut self, topic: &str) -> Result<Self, Error> {
        self.add_topic(topic)?;
        Ok(self)
    }

    /// Topics in the order they were added.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|t| t.as_str())
    }
}

/// Tuning for [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Wait after a failed handshake before the next attempt.
    pub backoff_ms: u64,
    /// Longest single wait in
    /// [`run_until_connected`](ConnectionManager::run_until_connected)
    /// between watchdog feeds.
    pub watchdog_slice_ms: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            backoff_ms: 5_000,
            watchdog_slice_ms: 100,
        }
    }
}

#[derive(Serialize)]
struct Registration<'r> {
    id: &'r str,
    ip: &'r str,
}

/// Keeps a broker session alive.
///
/// See the [module documentation](self) for the state machine.
#[derive(Debug)]
pub struct ConnectionManager<'a, T, C> {
    identity: &'a Identity,
    transport: T,
    clock: C,
    config: ManagerConfig,
    started: bool,
    state: State,
    last_failure: Option<DisconnectReason>,
    retry_at: Option<u64>,
}

impl<'a, T: Transport, C: Clock> ConnectionManager<'a, T, C> {
    /// Manager with the default [`ManagerConfig`].
    pub fn new(identity: &'a Identity, transport: T, clock: C) -> Self {
        Self::with_config(identity, transport, clock, ManagerConfig::default())
    }

    /// Manager with explicit tuning.
    pub fn with_config(
        identity: &'a Identity,
        transport: T,
        clock: C,
        config: ManagerConfig,
    ) -> Self {
        Self {
            identity,
            transport,
            clock,
            config,
            started: false,
            state: State::Disconnected,
            last_failure: None,
            retry_at: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Why the last handshake failed or the last session dropped.
    pub fn last_failure(&self) -> Option<DisconnectReason> {
        self.last_failure
    }

    /// The identity the session is established for.
    pub fn identity(&self) -> &'a Identity {
        self.identity
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Milliseconds until the next handshake attempt is allowed, `0` if one
    /// may be made now.
    pub fn backoff_remaining_ms(&self) -> u64 {
        self.retry_at
            .map_or(0, |at| at.saturating_sub(self.clock.now_ms()))
    }

    /// The device topic for `suffix`.
    pub fn topic(&self, suffix: &str) -> Result<Topic, Error> {
        self.identity.topic(suffix).ok_or(Error::TopicTooLong)
    }

    /// Maintain the session. Call once per control-loop iteration.
    ///
    /// - Connected: services the transport and hands up to
    ///   [`MAX_MESSAGES_PER_CALL`] inbound messages to `handler`.
    /// - Not connected: makes at most one handshake attempt (connect,
    ///   announce, subscribe every topic in `options`).
    ///
    /// # Errors
    ///
    /// - [`Error::RetryPending`] while waiting out the backoff
    /// - [`Error::HandshakeFailed`] if the attempt made by this call failed
    /// - [`Error::NotConnected`] if the session dropped while being serviced;
    ///   the next call reconnects without waiting
    pub fn reconnect(
        &mut self,
        options: &SessionOptions,
        handler: &mut impl MessageHandler,
    ) -> Result<(), Error> {
        self.started = true;

        if self.state == State::Connected {
            if self.transport.is_connected() {
                return self.service(handler);
            }
            self.connection_lost(self.transport.disconnect_reason());
        } else if self.transport.is_connected() {
            info!("session: adopting established transport");
            self.retry_at = None;
            self.set_state(State::Connected);
            return self.service(handler);
        }

        let remaining_ms = self.backoff_remaining_ms();
        if remaining_ms > 0 {
            return Err(Error::RetryPending { remaining_ms });
        }

        self.handshake(options)?;
        self.service(handler)
    }

    /// Block until the session is established, retrying indefinitely.
    ///
    /// Backoff waits are cut into slices of
    /// [`ManagerConfig::watchdog_slice_ms`] and `watchdog` is fed after each
    /// slice and each attempt. `cancel` is checked before every attempt and
    /// every slice, never during a handshake.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] once `cancel` is set.
    pub fn run_until_connected(
        &mut self,
        options: &SessionOptions,
        handler: &mut impl MessageHandler,
        delay: &mut impl Delay,
        watchdog: &mut impl Watchdog,
        cancel: &AtomicBool,
    ) -> Result<(), Error> {
        loop {
            if cancel.load(Ordering::Relaxed) {
                info!("session: reconnect cancelled");
                return Err(Error::Cancelled);
            }
            match self.reconnect(options, handler) {
                Ok(()) => return Ok(()),
                Err(Error::HandshakeFailed(_) | Error::RetryPending { .. } | Error::NotConnected) => {}
                Err(e) => return Err(e),
            }
            watchdog.feed();

            loop {
                let remaining_ms = self.backoff_remaining_ms();
                if remaining_ms == 0 {
                    break;
                }
                if cancel.load(Ordering::Relaxed) {
                    info!("session: reconnect cancelled");
                    return Err(Error::Cancelled);
                }
                let slice = remaining_ms.min(u64::from(self.config.watchdog_slice_ms.max(1)));
                // `slice` never exceeds a u32 slice length
                delay.delay_ms(slice as u32);
                watchdog.feed();
            }
        }
    }

    /// Publish on an arbitrary topic.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] before the first [`reconnect`](Self::reconnect)
    /// - [`Error::NotConnected`] unless [`State::Connected`]; the transport
    ///   is not touched
    /// - [`Error::PublishFailed`] if the transport rejects the message
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Error> {
        if !self.started {
            return Err(Error::NotReady);
        }
        if self.state != State::Connected {
            debug!("session: not connected, dropping publish to {}", topic);
            return Err(Error::NotConnected);
        }
        if self.transport.publish(topic, payload) {
            Ok(())
        } else {
            warn!("session: publish to {} failed", topic);
            Err(Error::PublishFailed)
        }
    }

    /// Publish on the device topic `/raw/<class>/<id>/<suffix>`.
    pub fn publish_status(&mut self, suffix: &str, payload: &[u8]) -> Result<(), Error> {
        let topic = self.topic(suffix)?;
        self.publish(&topic, payload)
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!("session: {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn connection_lost(&mut self, reason: DisconnectReason) {
        warn!("session: connection lost: {}", reason);
        self.last_failure = Some(reason);
        self.set_state(State::Disconnected);
    }

    fn handshake(&mut self, options: &SessionOptions) -> Result<(), Error> {
        let client_id = self.identity.client_id().ok_or(Error::CapacityExceeded)?;

        self.set_state(State::Connecting);
        if let Err(reason) = self
            .transport
            .connect(&client_id, options.credentials.as_ref())
        {
            let now = self.clock.now_ms();
            self.retry_at = Some(now.saturating_add(self.config.backoff_ms));
            self.last_failure = Some(reason);
            self.set_state(State::Disconnected);
            warn!(
                "session: connect failed, rc={}, retry in {} ms",
                reason.code(),
                self.config.backoff_ms
            );
            return Err(Error::HandshakeFailed(reason));
        }
        self.retry_at = None;

        self.set_state(State::Announcing);
        self.announce();

        self.set_state(State::Subscribing);
        let mut failed = 0usize;
        for topic in options.topics() {
            if !self.transport.subscribe(topic) {
                warn!("session: subscribe to {} failed", topic);
                failed += 1;
            }
        }

        self.set_state(State::Connected);
        info!(
            "session: connected as {}, {} subscription(s) failed",
            client_id.as_str(),
            failed
        );
        Ok(())
    }

    /// Best effort: the session is usable without the announcement.
    fn announce(&mut self) {
        let Some(topic) = self.identity.register_topic() else {
            warn!("session: registration topic too long");
            return;
        };
        let registration = Registration {
            id: self.identity.id(),
            ip: self.transport.local_address().unwrap_or(UNKNOWN_ADDRESS),
        };
        let mut payload = [0u8; REGISTRATION_CAPACITY];
        let Ok(len) = serde_json_core::to_slice(&registration, &mut payload) else {
            warn!("session: registration payload too large");
            return;
        };
        if !self.transport.publish(&topic, &payload[..len]) {
            warn!("session: registration publish failed");
        }
    }

    fn service(&mut self, handler: &mut impl MessageHandler) -> Result<(), Error> {
        for _ in 0..MAX_MESSAGES_PER_CALL {
            match self.transport.poll() {
                Ok(Some(message)) => handler.on_message(&message.topic, &message.payload),
                Ok(None) => break,
                Err(reason) => {
                    self.connection_lost(reason);
                    return Err(Error::NotConnected);
                }
            }
        }
        Ok(())
    }
}
