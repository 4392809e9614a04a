//! The configuration document value types.

use super::{ConfigError, MAX_DOCUMENT_SIZE, MAX_ENTRIES, MAX_KEY_LEN, MAX_STRING_LEN, json};
use heapless::{FnvIndexMap, String};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Document key.
pub type Key = String<MAX_KEY_LEN>;

/// A single configuration value.
///
/// Only scalar JSON values are supported; a configuration document is a flat
/// object.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `true` / `false`
    Bool(bool),
    /// A number without fraction or exponent that fits an `i64`.
    Int(i64),
    /// Any other finite number.
    Float(f64),
    /// A string of at most [`MAX_STRING_LEN`] bytes.
    Str(String<MAX_STRING_LEN>),
}

impl Value {
    /// The boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The number as a float. Integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl TryFrom<&str> for Value {
    type Error = ConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        String::try_from(value)
            .map(Value::Str)
            .map_err(|_| ConfigError::CapacityExceeded)
    }
}

/// A flat, bounded key → value configuration document.
///
/// Entries keep their insertion order, so saving the same document twice
/// produces the same bytes. Equality ignores order.
///
/// # Examples
///
/// ```rust
/// use nodehelper::config::Document;
///
/// let mut doc = Document::new();
/// doc.insert("name", "living-room")?;
/// doc.insert("steps", 4200)?;
/// doc.insert("inverted", false)?;
///
/// assert_eq!(doc.get_str("name"), Some("living-room"));
/// assert_eq!(doc.get_i64("steps"), Some(4200));
/// assert_eq!(
///     doc.to_json()?.as_str(),
///     r#"{"name":"living-room","steps":4200,"inverted":false}"#
/// );
/// # Ok::<(), nodehelper::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Document {
    entries: FnvIndexMap<Key, Value, MAX_ENTRIES>,
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

fn key(name: &str) -> Option<Key> {
    String::try_from(name).ok()
}

impl Document {
    /// An empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(&key(name)?)
    }

    /// Whether `name` is present.
    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Look up a string value.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_str()
    }

    /// Look up a boolean value.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name)?.as_bool()
    }

    /// Look up an integer value.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name)?.as_i64()
    }

    /// Look up a numeric value as a float.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name)?.as_f64()
    }

    /// Insert or replace an entry, returning the previous value.
    ///
    /// `&str` values are accepted directly:
    /// `doc.insert("host", "broker.local")`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::CapacityExceeded`] if the key or a string value is too
    /// long, or the document already holds [`MAX_ENTRIES`] other keys.
    pub fn insert<V>(&mut self, name: &str, value: V) -> Result<Option<Value>, ConfigError>
    where
        V: TryInto<Value>,
        ConfigError: From<V::Error>,
    {
        let name = key(name).ok_or(ConfigError::CapacityExceeded)?;
        let value = value.try_into()?;
        self.entries
            .insert(name, value)
            .map_err(|_| ConfigError::CapacityExceeded)
    }

    /// Remove an entry, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.entries.remove(&key(name)?)
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Serialize to compact JSON.
    ///
    /// # Errors
    ///
    /// [`ConfigError::TooLarge`] past [`MAX_DOCUMENT_SIZE`] bytes,
    /// [`ConfigError::InvalidValue`] for NaN or infinite floats.
    pub fn to_json(&self) -> Result<String<MAX_DOCUMENT_SIZE>, ConfigError> {
        let mut out = String::new();
        json::write_document(self, &mut out)?;
        Ok(out)
    }

    /// Parse a flat JSON object.
    ///
    /// # Errors
    ///
    /// [`ConfigError::TooLarge`] past [`MAX_DOCUMENT_SIZE`] bytes,
    /// [`ConfigError::ParseError`] for anything that is not a well-formed
    /// flat object within the document bounds.
    pub fn from_json(input: &[u8]) -> Result<Self, ConfigError> {
        if input.len() > MAX_DOCUMENT_SIZE {
            return Err(ConfigError::TooLarge);
        }
        json::parse_document(input)
    }

    /// Build a document from a typed settings struct.
    ///
    /// The value must serialize to a flat JSON object.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, ConfigError> {
        let mut buf = [0u8; MAX_DOCUMENT_SIZE];
        let len =
            serde_json_core::to_slice(value, &mut buf).map_err(|_| ConfigError::TooLarge)?;
        Self::from_json(&buf[..len])
    }

    /// Decode the document into a typed settings struct.
    ///
    /// Unknown keys are ignored; missing keys fail unless the field has a
    /// serde default.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let json = self.to_json()?;
        serde_json_core::from_str::<T>(&json)
            .map(|(value, _)| value)
            .map_err(|_| ConfigError::ParseError)
    }
}

impl From<core::convert::Infallible> for ConfigError {
    fn from(never: core::convert::Infallible) -> Self {
        match never {}
    }
}
