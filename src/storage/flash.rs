//! Single-file file system on top of an erasable flash region.
//!
//! [`FlashFs`] keeps exactly one file in a dedicated [`Region`] of any
//! [`BlockingErase`] medium. That is all a device needs to keep one
//! configuration document around, and it avoids pulling a full flash file
//! system into the firmware.
//!
//! # On-flash layout
//!
//! ```text
//! offset  size  field
//! 0       4     magic "NHFS"
//! 4       2     path length (LE)
//! 6       2     data length (LE)
//! 8       4     CRC-32 over path ‖ data (LE)
//! 12      ..    path bytes, then data bytes
//! ```
//!
//! A commit erases the region, writes the body and writes the header last.
//! If power is lost half way the header is either still erased (no file) or
//! its checksum does not match the body ([`Error::Corrupted`]). A torn write
//! therefore never reads back as a valid file.

use super::error::Error;
use super::{BlockingErase, File, FileSystem, Mode, Region};
use heapless::{String, Vec};

/// Marker at the start of a committed file record.
pub const MAGIC: [u8; 4] = *b"NHFS";
/// Size of the record header in bytes.
pub const HEADER_LEN: usize = 12;
/// Longest path the slot can store.
pub const MAX_PATH_LEN: usize = 32;
/// Default per-file size limit (write buffer capacity).
pub const DEFAULT_FILE_CAPACITY: usize = 2048;

const VERIFY_CHUNK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    path_len: u16,
    data_len: u16,
    crc: u32,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut raw = [0u8; HEADER_LEN];
        raw[..4].copy_from_slice(&MAGIC);
        raw[4..6].copy_from_slice(&self.path_len.to_le_bytes());
        raw[6..8].copy_from_slice(&self.data_len.to_le_bytes());
        raw[8..12].copy_from_slice(&self.crc.to_le_bytes());
        raw
    }

    fn decode(raw: &[u8; HEADER_LEN]) -> Option<Self> {
        if raw[..4] != MAGIC {
            return None;
        }
        Some(Self {
            path_len: u16::from_le_bytes([raw[4], raw[5]]),
            data_len: u16::from_le_bytes([raw[6], raw[7]]),
            crc: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
        })
    }

    fn body_len(&self) -> usize {
        self.path_len as usize + self.data_len as usize
    }
}

/// A one-file file system living in `start..end` of a flash device.
///
/// `N` bounds the size of a file written through a [`FlashFile`] handle.
///
/// # Examples
///
/// ```rust,ignore
/// use nodehelper::storage::flash::FlashFs;
///
/// // Reserve the last 4 KiB sector of the flash chip for configuration.
/// let fs: FlashFs<_> = FlashFs::new(flash, 0x3F_F000, 0x1000)?;
/// ```
#[derive(Debug)]
pub struct FlashFs<S, const N: usize = DEFAULT_FILE_CAPACITY> {
    storage: S,
    start: u32,
    end: u32,
}

impl<S, const N: usize> Region for FlashFs<S, N> {
    fn start(&self) -> u32 {
        self.start
    }

    fn end(&self) -> u32 {
        self.end
    }
}

impl<S: BlockingErase, const N: usize> FlashFs<S, N> {
    /// Mount the file system on `len` bytes starting at `start`.
    ///
    /// Nothing is written; an erased region simply holds no file.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfBounds`] if the region does not fit on the device or is
    /// too small to hold a header.
    pub fn new(storage: S, start: u32, len: u32) -> Result<Self, Error> {
        let end = start.checked_add(len).ok_or(Error::OutOfBounds)?;
        if end as usize > storage.capacity() || (len as usize) < HEADER_LEN {
            return Err(Error::OutOfBounds);
        }
        Ok(Self {
            storage,
            start,
            end,
        })
    }

    /// Borrow the underlying device.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Mutably borrow the underlying device.
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Unmount and hand the device back.
    pub fn release(self) -> S {
        self.storage
    }

    fn body_offset(&self) -> u32 {
        self.start + HEADER_LEN as u32
    }

    fn body_fits(&self, body_len: usize) -> bool {
        body_len == 0 || self.contains(self.body_offset().saturating_add(body_len as u32 - 1))
    }

    fn read_header(&mut self) -> Result<Option<Header>, Error> {
        let mut raw = [0u8; HEADER_LEN];
        self.storage
            .read(self.start, &mut raw)
            .map_err(|_| Error::ReadError)?;
        match Header::decode(&raw) {
            Some(header) if !self.body_fits(header.body_len()) => Err(Error::Corrupted),
            other => Ok(other),
        }
    }

    fn path_matches(&mut self, header: &Header, path: &str) -> Result<bool, Error> {
        if header.path_len as usize != path.len() || path.len() > MAX_PATH_LEN {
            return Ok(false);
        }
        let mut stored = [0u8; MAX_PATH_LEN];
        let stored = &mut stored[..path.len()];
        self.storage
            .read(self.body_offset(), stored)
            .map_err(|_| Error::ReadError)?;
        Ok(stored == path.as_bytes())
    }

    fn verify(&mut self, header: &Header) -> Result<(), Error> {
        let mut hasher = crc32fast::Hasher::new();
        let mut chunk = [0u8; VERIFY_CHUNK];
        let mut offset = self.body_offset();
        let mut remaining = header.body_len();
        while remaining > 0 {
            let n = remaining.min(VERIFY_CHUNK);
            self.storage
                .read(offset, &mut chunk[..n])
                .map_err(|_| Error::ReadError)?;
            hasher.update(&chunk[..n]);
            offset += n as u32;
            remaining -= n;
        }
        if hasher.finalize() == header.crc {
            Ok(())
        } else {
            Err(Error::Corrupted)
        }
    }

    fn commit(&mut self, path: &str, data: &[u8]) -> Result<(), Error> {
        let path_len = u16::try_from(path.len()).map_err(|_| Error::InvalidPath)?;
        let data_len = u16::try_from(data.len()).map_err(|_| Error::FileTooLarge)?;
        if !self.body_fits(path.len() + data.len()) {
            return Err(Error::FileTooLarge);
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(path.as_bytes());
        hasher.update(data);
        let header = Header {
            path_len,
            data_len,
            crc: hasher.finalize(),
        };

        self.storage
            .erase(self.start, self.end)
            .map_err(|_| Error::EraseError)?;
        let body = self.body_offset();
        self.storage
            .write(body, path.as_bytes())
            .map_err(|_| Error::WriteError)?;
        if !data.is_empty() {
            self.storage
                .write(body + path.len() as u32, data)
                .map_err(|_| Error::WriteError)?;
        }
        self.storage
            .write(self.start, &header.encode())
            .map_err(|_| Error::WriteError)?;

        debug!("flashfs: committed {} bytes to {}", data.len(), path);
        Ok(())
    }
}

fn checked_path(path: &str) -> Result<String<MAX_PATH_LEN>, Error> {
    if path.is_empty() {
        return Err(Error::InvalidPath);
    }
    String::try_from(path).map_err(|_| Error::InvalidPath)
}

impl<S: BlockingErase, const N: usize> FileSystem for FlashFs<S, N> {
    type Error = Error;
    type File<'a>
        = FlashFile<'a, S, N>
    where
        Self: 'a;

    fn open(&mut self, path: &str, mode: Mode) -> Result<Self::File<'_>, Self::Error> {
        let path = checked_path(path)?;
        let handle = match mode {
            Mode::Read => {
                let header = self.read_header()?.ok_or(Error::NotFound)?;
                if !self.path_matches(&header, &path)? {
                    return Err(Error::NotFound);
                }
                self.verify(&header)?;
                Handle::Reader {
                    offset: self.body_offset() + header.path_len as u32,
                    len: header.data_len as usize,
                    pos: 0,
                }
            }
            Mode::Write => Handle::Writer {
                buffer: Vec::new(),
            },
        };
        Ok(FlashFile {
            fs: self,
            path,
            handle,
        })
    }

    fn exists(&mut self, path: &str) -> bool {
        match self.read_header() {
            Ok(Some(header)) => self.path_matches(&header, path).unwrap_or(false),
            _ => false,
        }
    }

    fn format(&mut self) -> Result<(), Self::Error> {
        self.storage
            .erase(self.start, self.end)
            .map_err(|_| Error::EraseError)?;
        info!("flashfs: formatted {} bytes", self.size());
        Ok(())
    }
}

#[derive(Debug)]
enum Handle<const N: usize> {
    Reader { offset: u32, len: usize, pos: usize },
    Writer { buffer: Vec<u8, N> },
}

/// Handle to the file held by a [`FlashFs`].
///
/// Writes are staged in RAM and reach flash on [`flush`](File::flush).
/// Dropping a write handle without flushing leaves the previous file intact.
#[derive(Debug)]
pub struct FlashFile<'a, S, const N: usize> {
    fs: &'a mut FlashFs<S, N>,
    path: String<MAX_PATH_LEN>,
    handle: Handle<N>,
}

impl<S: BlockingErase, const N: usize> File for FlashFile<'_, S, N> {
    type Error = Error;

    fn size(&self) -> usize {
        match &self.handle {
            Handle::Reader { len, .. } => *len,
            Handle::Writer { buffer } => buffer.len(),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Handle::Reader { offset, len, pos } = &mut self.handle else {
            return Err(Error::ReadError);
        };
        let n = buf.len().min(*len - *pos);
        if n == 0 {
            return Ok(0);
        }
        self.fs
            .storage
            .read(*offset + *pos as u32, &mut buf[..n])
            .map_err(|_| Error::ReadError)?;
        *pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let Handle::Writer { buffer } = &mut self.handle else {
            return Err(Error::WriteError);
        };
        let n = buf.len().min(N - buffer.len());
        if n == 0 && !buf.is_empty() {
            return Err(Error::FileTooLarge);
        }
        // `n` never exceeds the spare capacity
        let _ = buffer.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        match &self.handle {
            Handle::Reader { .. } => Ok(()),
            Handle::Writer { buffer } => self.fs.commit(&self.path, buffer),
        }
    }
}
