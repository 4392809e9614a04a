//! # nodehelper - device helper for connected embedded nodes
//!
//! The two chores every small networked device repeats, done once:
//!
//! - **Configuration**: [`config::ConfigStore`] keeps a single bounded JSON
//!   document in non-volatile storage. Load it at boot, save it when the
//!   user changes a setting, reset it on factory reset.
//! - **Broker session**: [`network::session::ConnectionManager`] keeps an
//!   MQTT session alive. Called once per control-loop iteration it
//!   reconnects with backoff, announces the device on the registration
//!   topic, restores subscriptions and delivers inbound messages, without
//!   ever blocking the loop.
//!
//! Hardware is reached only through small traits:
//! [`storage::FileSystem`] for the file system, [`network::Transport`] (or
//! [`network::Connect`] through
//! [`MqttTransport`](network::application::mqtt::MqttTransport)) for the
//! broker, and the collaborators in [`system`] for time, watchdog and chip
//! identity.
//!
//! ## Usage
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! nodehelper = "0.1.0"
//! ```
//!
//! ### Boot sequence
//!
//! ```rust,no_run
//! use nodehelper::config::{ConfigStore, Document};
//! use nodehelper::network::session::{ConnectionManager, SessionOptions};
//! use nodehelper::network::{Credentials, Transport};
//! use nodehelper::storage::FileSystem;
//! use nodehelper::system::{Clock, Identity};
//!
//! fn boot<F: FileSystem, T: Transport, C: Clock>(fs: F, transport: T, clock: C) {
//!     let mut store = ConfigStore::new(fs);
//!     let config = store.load().unwrap_or_else(|_| Document::new());
//!
//!     let mut options = SessionOptions::new();
//!     options.credentials =
//!         Credentials::from_parts(config.get_str("mqtt_user"), config.get_str("mqtt_pwd"));
//!
//!     let identity = Identity::from_chip_id("esp8266", 1_234_567).unwrap();
//!     let mut manager = ConnectionManager::new(&identity, transport, clock);
//!     loop {
//!         let _ = manager.reconnect(&options, &mut |_: &str, _: &[u8]| {});
//!         let _ = manager.publish_status("position", b"0");
//!     }
//! }
//! ```
//!
//! ## Optional Features
//!
//! - `std`: Enable standard library support (default: disabled)
//! - `defmt`: Enable defmt logging support for embedded debugging

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

// Must come first so the logging macros are visible to every module.
#[macro_use]
mod fmt;

/// Persistent configuration document.
pub mod config;

/// Network abstraction layer, MQTT client and broker session management.
pub mod network;

/// Storage abstraction layer and a single-file flash file system.
pub mod storage;

/// System collaborators, device identity and factory reset.
pub mod system;
