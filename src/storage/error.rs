//! Common error types for storage operations

/// A common error type for storage operations.
///
/// Covers both the raw medium (flash, EEPROM) and the file layer built on
/// top of it. It is kept `Copy` and allocation-free so it can be returned
/// from `no_std` drivers unchanged.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// An operation was attempted on an address that is out of bounds.
    OutOfBounds,
    /// An error occurred during a write operation.
    WriteError,
    /// An error occurred during a read operation.
    ReadError,
    /// An error occurred during an erase operation.
    EraseError,
    /// An operation was attempted on a device that was not initialized.
    NotInitialized,
    /// The underlying storage is bad/unusable at a specific location
    StorageFault,
    /// The requested file does not exist.
    NotFound,
    /// A file record exists but its checksum does not match its contents.
    Corrupted,
    /// The path is empty or longer than the file system supports.
    InvalidPath,
    /// The file does not fit into the space the file system has for it.
    FileTooLarge,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Error::OutOfBounds => "address out of bounds",
            Error::WriteError => "write failed",
            Error::ReadError => "read failed",
            Error::EraseError => "erase failed",
            Error::NotInitialized => "device not initialized",
            Error::StorageFault => "storage fault",
            Error::NotFound => "file not found",
            Error::Corrupted => "file checksum mismatch",
            Error::InvalidPath => "invalid path",
            Error::FileTooLarge => "file too large",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::OutOfBounds => defmt::write!(f, "OutOfBounds"),
            Error::WriteError => defmt::write!(f, "WriteError"),
            Error::ReadError => defmt::write!(f, "ReadError"),
            Error::EraseError => defmt::write!(f, "EraseError"),
            Error::NotInitialized => defmt::write!(f, "NotInitialized"),
            Error::StorageFault => defmt::write!(f, "StorageFault"),
            Error::NotFound => defmt::write!(f, "NotFound"),
            Error::Corrupted => defmt::write!(f, "Corrupted"),
            Error::InvalidPath => defmt::write!(f, "InvalidPath"),
            Error::FileTooLarge => defmt::write!(f, "FileTooLarge"),
        }
    }
}
