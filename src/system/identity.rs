//! Device identity and the names derived from it.

use core::fmt::Write;
use heapless::String;

/// Longest device class, e.g. `esp8266`.
pub const MAX_CLASS_LEN: usize = 16;
/// Longest device identifier.
pub const MAX_ID_LEN: usize = 24;
/// Longest topic built from an identity.
pub const MAX_TOPIC_LEN: usize = 128;

/// A broker client identifier: `<class>-<id>`.
pub type ClientId = String<{ MAX_CLASS_LEN + 1 + MAX_ID_LEN }>;
/// A topic derived from an identity.
pub type Topic = String<MAX_TOPIC_LEN>;

/// Source of a stable, hardware-derived chip identifier.
pub trait ChipId {
    /// The chip identifier, e.g. the low bytes of the MAC address.
    fn chip_id(&self) -> u32;
}

/// Who this device is on the broker.
///
/// Computed once at startup and handed to the
/// [`ConnectionManager`](crate::network::session::ConnectionManager) by
/// reference. Never persisted.
///
/// # Examples
///
/// ```rust
/// use nodehelper::system::identity::Identity;
///
/// let identity = Identity::from_chip_id("esp8266", 1_234_567).unwrap();
/// assert_eq!(identity.client_id().unwrap().as_str(), "esp8266-1234567");
/// assert_eq!(identity.topic("status").unwrap().as_str(), "/raw/esp8266/1234567/status");
/// assert_eq!(identity.register_topic().unwrap().as_str(), "/raw/esp8266/register");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    class: String<MAX_CLASS_LEN>,
    id: String<MAX_ID_LEN>,
}

impl Identity {
    /// Identity from a device class and an identifier.
    ///
    /// `None` if either part is empty, too long, or contains a `/` (it would
    /// change the topic hierarchy).
    pub fn new(class: &str, id: &str) -> Option<Self> {
        Some(Self {
            class: segment(class)?,
            id: segment(id)?,
        })
    }

    /// Identity from a numeric chip id, rendered in decimal.
    pub fn from_chip_id(class: &str, chip_id: u32) -> Option<Self> {
        let mut id = String::new();
        write!(id, "{}", chip_id).ok()?;
        Some(Self {
            class: segment(class)?,
            id,
        })
    }

    /// Identity read from the chip.
    pub fn from_chip(class: &str, chip: &impl ChipId) -> Option<Self> {
        Self::from_chip_id(class, chip.chip_id())
    }

    /// The device class.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// The device identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Client identifier presented to the broker.
    pub fn client_id(&self) -> Option<ClientId> {
        let mut out = String::new();
        write!(out, "{}-{}", self.class, self.id).ok()?;
        Some(out)
    }

    /// The device topic `/raw/<class>/<id>/<suffix>`.
    ///
    /// `None` if the result exceeds [`MAX_TOPIC_LEN`].
    pub fn topic(&self, suffix: &str) -> Option<Topic> {
        let mut out = String::new();
        write!(out, "/raw/{}/{}/{}", self.class, self.id, suffix).ok()?;
        Some(out)
    }

    /// Where presence announcements go: `/raw/<class>/register`.
    pub fn register_topic(&self) -> Option<Topic> {
        let mut out = String::new();
        write!(out, "/raw/{}/register", self.class).ok()?;
        Some(out)
    }
}

fn segment<const N: usize>(s: &str) -> Option<String<N>> {
    if s.is_empty() || s.contains('/') {
        return None;
    }
    String::try_from(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedChip(u32);

    impl ChipId for FixedChip {
        fn chip_id(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn test_names() {
        let identity = Identity::new("esp8266", "abc").unwrap();
        assert_eq!(identity.class(), "esp8266");
        assert_eq!(identity.id(), "abc");
        assert_eq!(identity.client_id().unwrap().as_str(), "esp8266-abc");
        assert_eq!(
            identity.topic("position").unwrap().as_str(),
            "/raw/esp8266/abc/position"
        );
        assert_eq!(
            identity.register_topic().unwrap().as_str(),
            "/raw/esp8266/register"
        );
    }

    #[test]
    fn test_from_chip() {
        let identity = Identity::from_chip("esp32", &FixedChip(u32::MAX)).unwrap();
        assert_eq!(identity.id(), "4294967295");
        assert_eq!(identity, Identity::new("esp32", "4294967295").unwrap());
    }

    #[test]
    fn test_rejects_bad_segments() {
        assert!(Identity::new("", "1").is_none());
        assert!(Identity::new("esp", "").is_none());
        assert!(Identity::new("a/b", "1").is_none());
        assert!(Identity::new("esp", &"9".repeat(MAX_ID_LEN + 1)).is_none());
        assert!(Identity::from_chip_id(&"c".repeat(MAX_CLASS_LEN + 1), 1).is_none());
    }

    #[test]
    fn test_topic_too_long() {
        let identity = Identity::new("esp8266", "1").unwrap();
        assert!(identity.topic(&"s".repeat(MAX_TOPIC_LEN)).is_none());
    }
}
