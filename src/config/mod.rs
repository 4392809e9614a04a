//! # Persistent device configuration
//!
//! [`ConfigStore`] keeps one small JSON document in a file on the device's
//! non-volatile storage. The document is loaded once at startup and written
//! back wholesale whenever the configuration changes:
//!
//! - [`load`](ConfigStore::load) either returns a complete, well-formed
//!   [`Document`] or an error. Callers fall back to defaults on error.
//! - [`save`](ConfigStore::save) replaces the whole document.
//! - [`reset`](ConfigStore::reset) formats the file system (factory reset).
//!
//! The stored document never exceeds [`MAX_DOCUMENT_SIZE`] bytes, which keeps
//! the load buffer on the stack of even the smallest targets.
//!
//! # Examples
//!
//! ```rust,no_run
//! use nodehelper::config::{ConfigError, ConfigStore, Document};
//! use nodehelper::storage::FileSystem;
//!
//! fn boot<F: FileSystem>(fs: F) -> Result<Document, ConfigError> {
//!     let mut store = ConfigStore::new(fs);
//!     match store.load() {
//!         Ok(doc) => Ok(doc),
//!         Err(ConfigError::NotFound) => {
//!             let mut defaults = Document::new();
//!             defaults.insert("mqtt_server", "broker.local")?;
//!             defaults.insert("mqtt_port", 1883)?;
//!             store.save(&defaults)?;
//!             Ok(defaults)
//!         }
//!         Err(e) => Err(e),
//!     }
//! }
//! ```

use crate::storage::error::Error as StorageError;
use crate::storage::{File, FileSystem, Mode};

mod document;
mod json;


pub use document::{Document, Key, Value};

/// Upper bound on the serialized document, in bytes.
pub const MAX_DOCUMENT_SIZE: usize = 1024;
/// Maximum number of entries in a document.
pub const MAX_ENTRIES: usize = 16;
/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 32;
/// Maximum length of a string value in bytes.
pub const MAX_STRING_LEN: usize = 128;
/// Where the document lives unless [`ConfigStore::with_path`] says otherwise.
pub const CONFIG_PATH: &str = "/config.json";

/// Errors returned by [`ConfigStore`] and [`Document`].
///
/// All of them are recoverable: the usual reaction is to fall back to
/// default settings or report the problem to the operator.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConfigError {
    /// No document has been saved yet.
    NotFound,
    /// The document is larger than [`MAX_DOCUMENT_SIZE`].
    TooLarge,
    /// The stored content is not a well-formed flat JSON object, or failed
    /// its storage checksum.
    ParseError,
    /// The storage medium failed while reading.
    ReadError,
    /// The storage medium rejected the write (full, faulty, ...).
    WriteError,
    /// A value cannot be represented in JSON (NaN, infinity).
    InvalidValue,
    /// A key, string value or entry count exceeds the document bounds.
    CapacityExceeded,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            ConfigError::NotFound => "no saved configuration",
            ConfigError::TooLarge => "configuration too large",
            ConfigError::ParseError => "configuration is not well-formed",
            ConfigError::ReadError => "failed to read configuration",
            ConfigError::WriteError => "failed to write configuration",
            ConfigError::InvalidValue => "value cannot be stored as JSON",
            ConfigError::CapacityExceeded => "document bounds exceeded",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ConfigError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            ConfigError::NotFound => defmt::write!(f, "NotFound"),
            ConfigError::TooLarge => defmt::write!(f, "TooLarge"),
            ConfigError::ParseError => defmt::write!(f, "ParseError"),
            ConfigError::ReadError => defmt::write!(f, "ReadError"),
            ConfigError::WriteError => defmt::write!(f, "WriteError"),
            ConfigError::InvalidValue => defmt::write!(f, "InvalidValue"),
            ConfigError::CapacityExceeded => defmt::write!(f, "CapacityExceeded"),
        }
    }
}

fn read_failure(error: StorageError) -> ConfigError {
    match error {
        StorageError::NotFound => ConfigError::NotFound,
        StorageError::Corrupted => ConfigError::ParseError,
        StorageError::FileTooLarge => ConfigError::TooLarge,
        _ => ConfigError::ReadError,
    }
}

/// Owner of the persisted configuration document.
///
/// There is no caching: every [`load`](Self::load) goes to storage and
/// returns a fresh value, every [`save`](Self::save) writes through.
#[derive(Debug)]
pub struct ConfigStore<F> {
    fs: F,
    path: &'static str,
}

impl<F: FileSystem> ConfigStore<F> {
    /// Store the document at [`CONFIG_PATH`].
    pub fn new(fs: F) -> Self {
        Self::with_path(fs, CONFIG_PATH)
    }

    /// Store the document at `path`.
    pub fn with_path(fs: F, path: &'static str) -> Self {
        Self { fs, path }
    }

    /// The file the document lives in.
    pub fn path(&self) -> &str {
        self.path
    }

    /// Whether a document has been saved.
    pub fn exists(&mut self) -> bool {
        self.fs.exists(self.path)
    }

    /// Load the saved document.
    ///
    /// The size is checked before anything is read, so an oversized file
    /// never makes it into memory.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NotFound`] if nothing was saved yet
    /// - [`ConfigError::TooLarge`] if the file exceeds [`MAX_DOCUMENT_SIZE`]
    /// - [`ConfigError::ParseError`] if the content is corrupt or malformed
    /// - [`ConfigError::ReadError`] if the medium fails
    pub fn load(&mut self) -> Result<Document, ConfigError> {
        let mut file = self
            .fs
            .open(self.path, Mode::Read)
            .map_err(|e| read_failure(e.into()))?;

        let size = file.size();
        if size > MAX_DOCUMENT_SIZE {
            warn!("config: {} is {} bytes, refusing to load", self.path, size);
            return Err(ConfigError::TooLarge);
        }

        let mut buf = [0u8; MAX_DOCUMENT_SIZE];
        let mut filled = 0;
        while filled < size {
            let n = file
                .read(&mut buf[filled..size])
                .map_err(|e| read_failure(e.into()))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled != size {
            return Err(ConfigError::ReadError);
        }

        let doc = Document::from_json(&buf[..filled]);
        match &doc {
            Ok(doc) => debug!("config: loaded {} entries", doc.len()),
            Err(e) => warn!("config: {} rejected: {}", self.path, e),
        }
        doc
    }

    /// Replace the saved document with `doc`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::TooLarge`] if the serialized document would exceed
    ///   [`MAX_DOCUMENT_SIZE`]; storage is left untouched
    /// - [`ConfigError::InvalidValue`] for non-finite floats
    /// - [`ConfigError::WriteError`] if the medium rejects the write
    pub fn save(&mut self, doc: &Document) -> Result<(), ConfigError> {
        let json = doc.to_json()?;
        let bytes = json.as_bytes();

        let mut file = self
            .fs
            .open(self.path, Mode::Write)
            .map_err(|_| ConfigError::WriteError)?;
        let mut written = 0;
        while written < bytes.len() {
            let n = file
                .write(&bytes[written..])
                .map_err(|_| ConfigError::WriteError)?;
            if n == 0 {
                return Err(ConfigError::WriteError);
            }
            written += n;
        }
        file.flush().map_err(|_| ConfigError::WriteError)?;

        info!("config: saved {} bytes to {}", bytes.len(), self.path);
        Ok(())
    }

    /// Erase all persisted state. Irreversible.
    pub fn reset(&mut self) -> Result<(), ConfigError> {
        self.fs.format().map_err(|_| ConfigError::WriteError)?;
        info!("config: storage formatted");
        Ok(())
    }

    /// Borrow the file system.
    pub fn file_system(&self) -> &F {
        &self.fs
    }

    /// Mutably borrow the file system.
    pub fn file_system_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    /// Give the file system back.
    pub fn into_inner(self) -> F {
        self.fs
    }
}
