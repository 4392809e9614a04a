//! System collaborators for embedded devices.
//!
//! The helpers in this crate never talk to hardware directly. Everything
//! platform specific is reached through the small traits below, which a
//! board support crate implements once:
//!
//! - [`Clock`]: a monotonic millisecond counter
//! - [`Delay`]: a blocking wait
//! - [`Watchdog`]: keeps the hardware watchdog from resetting the chip
//! - [`ProvisioningReset`]: forgets WiFi credentials
//! - [`identity::ChipId`]: the hardware identifier
//!
//! # Usage
//!
//! ```rust
//! use nodehelper::system::{Clock, Delay};
//!
//! struct Ticks(u64);
//!
//! impl Clock for Ticks {
//!     fn now_ms(&self) -> u64 {
//!         self.0
//!     }
//! }
//!
//! impl Delay for Ticks {
//!     fn delay_ms(&mut self, ms: u32) {
//!         self.0 += u64::from(ms);
//!     }
//! }
//!
//! let mut ticks = Ticks(0);
//! ticks.delay_ms(250);
//! assert_eq!(ticks.now_ms(), 250);
//! ```

use crate::config::{ConfigError, ConfigStore};
use crate::storage::FileSystem;

/// Device identity and derived names.
pub mod identity;

pub use identity::{ChipId, Identity};

/// Monotonic time source.
pub trait Clock {
    /// Milliseconds since an arbitrary, fixed origin. Never goes backwards.
    fn now_ms(&self) -> u64;
}

/// Blocking delay.
pub trait Delay {
    /// Wait for at least `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);
}

/// Hardware watchdog.
pub trait Watchdog {
    /// Reset the watchdog timer.
    fn feed(&mut self);
}

/// Whatever stores network provisioning (WiFi credentials and the like).
pub trait ProvisioningReset {
    /// Forget all provisioning settings.
    fn reset_settings(&mut self);
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

impl<T: Delay + ?Sized> Delay for &mut T {
    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

impl<T: Watchdog + ?Sized> Watchdog for &mut T {
    fn feed(&mut self) {
        (**self).feed()
    }
}

/// Factory reset: erase persisted configuration, then forget provisioning.
///
/// Provisioning is left untouched if formatting storage fails, so the
/// device stays reachable to retry.
pub fn factory_reset<F: FileSystem>(
    store: &mut ConfigStore<F>,
    provisioning: &mut impl ProvisioningReset,
) -> Result<(), ConfigError> {
    warn!("system: factory reset");
    store.reset()?;
    provisioning.reset_settings();
    Ok(())
}
