//! # Storage abstraction layer for embedded systems
//!
//! Two levels of abstraction live here:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │   ConfigStore (crate::config) │
//! └──────────────────────────────┘
//!                │  FileSystem / File
//!                ▼
//! ┌──────────────────────────────┐
//! │   FlashFs (single-file slot)  │
//! └──────────────────────────────┘
//!                │  ReadStorage / Storage / BlockingErase
//!                ▼
//! ┌──────────────────────────────┐
//! │   Flash / EEPROM driver       │
//! └──────────────────────────────┘
//! ```
//!
//! - [`ReadStorage`], [`Storage`] and [`BlockingErase`] describe a raw,
//!   byte-addressed medium.
//! - [`FileSystem`] and [`File`] describe the small file abstraction the
//!   configuration store consumes. Any SPIFFS/LittleFS binding can implement
//!   them directly; [`flash::FlashFs`] implements them on top of a raw medium.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use nodehelper::storage::{File, FileSystem, Mode};
//!
//! fn read_banner<F: FileSystem>(fs: &mut F, buf: &mut [u8]) -> Result<usize, F::Error> {
//!     let mut file = fs.open("/banner.txt", Mode::Read)?;
//!     file.read(buf)
//! }
//! ```

#![deny(unsafe_code)]

/// Common error types for storage operations
pub mod error;

/// Single-file file system on top of an erasable flash region
pub mod flash;


/// Re-exports of common traits for convenient importing
pub mod prelude {
    pub use super::{BlockingErase, File, FileSystem, Mode, ReadStorage, Region, Storage};
}

/// A contiguous memory region with start and end boundaries.
///
/// # Examples
///
/// ```rust
/// use nodehelper::storage::Region;
///
/// struct Partition {
///     start: u32,
///     size: u32,
/// }
///
/// impl Region for Partition {
///     fn start(&self) -> u32 {
///         self.start
///     }
///
///     fn end(&self) -> u32 {
///         self.start + self.size
///     }
/// }
///
/// let nvs = Partition { start: 0x9000, size: 0x1000 };
/// assert!(nvs.contains(0x9000));
/// assert!(!nvs.contains(0xA000));
/// ```
pub trait Region {
    /// Start address of the region (inclusive).
    fn start(&self) -> u32;

    /// End address of the region (exclusive).
    fn end(&self) -> u32;

    /// Check if an address is contained within `start()..end()`.
    fn contains(&self, address: u32) -> bool {
        (address >= self.start()) && (address < self.end())
    }

    /// Size of the region in bytes.
    fn size(&self) -> u32 {
        self.end().saturating_sub(self.start())
    }
}

// ========================
// Raw medium traits
// ========================

/// Trait for reading data from storage devices.
pub trait ReadStorage {
    /// Associated error type for read operations
    type Error: core::fmt::Debug;

    /// Read data from the storage device.
    ///
    /// Fills the whole buffer starting at `offset`.
    ///
    /// # Errors
    ///
    /// - `OutOfBounds` if offset + buffer length exceeds device capacity
    /// - `ReadError` if hardware read operation fails
    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error>;

    /// Get the total capacity of the storage device in bytes.
    fn capacity(&self) -> usize;
}

/// Trait for storage devices that support both read and write operations.
pub trait Storage: ReadStorage {
    /// Write data to the storage device.
    ///
    /// Flash-like media only clear bits on write, so callers are expected to
    /// erase the target range first (see [`BlockingErase`]).
    ///
    /// # Errors
    ///
    /// - `OutOfBounds` if offset + data length exceeds device capacity
    /// - `WriteError` if hardware write operation fails
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Trait for storage devices that support erase operations.
pub trait BlockingErase: Storage {
    /// Erase `from..to`. Erased bytes read back as `0xFF`.
    ///
    /// # Errors
    ///
    /// - `OutOfBounds` if the address range is invalid
    /// - `EraseError` if the hardware erase operation fails
    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error>;
}

// ========================
// File system collaborator
// ========================

/// How a file is opened.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Mode {
    /// Read an existing file from the beginning.
    Read,
    /// Create the file, or truncate an existing one, and write from the
    /// beginning. Content becomes visible once [`File::flush`] succeeds.
    Write,
}

/// An open file handle.
pub trait File {
    /// Associated error type
    type Error: core::fmt::Debug;

    /// Current size of the file in bytes.
    fn size(&self) -> usize;

    /// Read from the current position, returning how many bytes were read.
    /// `Ok(0)` means end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Append to the file, returning how many bytes were accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;

    /// Commit everything written so far to the medium.
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// A small file system, as exposed by SPIFFS/LittleFS style drivers.
///
/// Errors must be convertible into the crate's storage [`error::Error`] so
/// that callers can tell a missing file from a failing medium.
pub trait FileSystem {
    /// Associated error type
    type Error: core::fmt::Debug + Into<error::Error>;

    /// Handle type returned by [`open`](FileSystem::open).
    type File<'a>: File<Error = Self::Error>
    where
        Self: 'a;

    /// Open the file at `path`.
    ///
    /// Opening a missing file for reading fails with a `NotFound` error.
    fn open(&mut self, path: &str, mode: Mode) -> Result<Self::File<'_>, Self::Error>;

    /// Whether a file exists at `path`.
    fn exists(&mut self, path: &str) -> bool;

    /// Erase every file. Irreversible.
    fn format(&mut self) -> Result<(), Self::Error>;
}
