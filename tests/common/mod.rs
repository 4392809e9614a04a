//! Hand-written collaborators shared by the integration tests.
#![allow(dead_code)]

use nodehelper::network::{Credentials, DisconnectReason, InboundMessage, Transport};
use nodehelper::storage::error::Error;
use nodehelper::storage::{BlockingErase, File, FileSystem, Mode, ReadStorage, Storage};
use nodehelper::system::{Clock, Delay, ProvisioningReset, Watchdog};
use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

// ========================
// Storage
// ========================

/// A file system kept in a `HashMap`.
#[derive(Debug, Default)]
pub struct MemFs {
    pub files: HashMap<String, Vec<u8>>,
    pub fail_reads: bool,
    pub fail_writes: bool,
    pub fail_format: bool,
    pub formats: usize,
}

impl FileSystem for MemFs {
    type Error = Error;
    type File<'a>
        = MemFile<'a>
    where
        Self: 'a;

    fn open(&mut self, path: &str, mode: Mode) -> Result<Self::File<'_>, Self::Error> {
        let data = match mode {
            Mode::Read => self.files.get(path).cloned().ok_or(Error::NotFound)?,
            Mode::Write => Vec::new(),
        };
        Ok(MemFile {
            fs: self,
            path: path.to_string(),
            data,
            pos: 0,
            mode,
        })
    }

    fn exists(&mut self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    fn format(&mut self) -> Result<(), Self::Error> {
        if self.fail_format {
            return Err(Error::EraseError);
        }
        self.files.clear();
        self.formats += 1;
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemFile<'a> {
    fs: &'a mut MemFs,
    path: String,
    data: Vec<u8>,
    pos: usize,
    mode: Mode,
}

impl File for MemFile<'_> {
    type Error = Error;

    fn size(&self) -> usize {
        self.data.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.fs.fail_reads || self.mode != Mode::Read {
            return Err(Error::ReadError);
        }
        // Hand out short reads to exercise the caller's loop
        let n = buf.len().min(self.data.len() - self.pos).min(100);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.fs.fail_writes || self.mode != Mode::Write {
            return Err(Error::WriteError);
        }
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.mode == Mode::Write {
            self.fs.files.insert(self.path.clone(), self.data.clone());
        }
        Ok(())
    }
}

/// RAM-backed flash with erase-before-write semantics.
#[derive(Debug)]
pub struct RamFlash {
    pub memory: Vec<u8>,
    /// Successful writes left before the medium fails.
    pub writes_left: Option<usize>,
    /// Every read fails while set.
    pub fail_reads: bool,
}

impl RamFlash {
    pub fn new(size: usize) -> Self {
        Self {
            memory: vec![0xFF; size],
            writes_left: None,
            fail_reads: false,
        }
    }
}

impl ReadStorage for RamFlash {
    type Error = Error;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if self.fail_reads {
            return Err(Error::ReadError);
        }
        let offset = offset as usize;
        let src = self
            .memory
            .get(offset..offset + bytes.len())
            .ok_or(Error::OutOfBounds)?;
        bytes.copy_from_slice(src);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.memory.len()
    }
}

impl Storage for RamFlash {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if let Some(left) = self.writes_left.as_mut() {
            if *left == 0 {
                return Err(Error::WriteError);
            }
            *left -= 1;
        }
        let offset = offset as usize;
        let dst = self
            .memory
            .get_mut(offset..offset + bytes.len())
            .ok_or(Error::OutOfBounds)?;
        for (cell, byte) in dst.iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }
}

impl BlockingErase for RamFlash {
    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let range = self
            .memory
            .get_mut(from as usize..to as usize)
            .ok_or(Error::OutOfBounds)?;
        range.fill(0xFF);
        Ok(())
    }
}

// ========================
// System
// ========================

/// Manually driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct MockClock(Rc<Cell<u64>>);

impl MockClock {
    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

/// Delay that advances a [`MockClock`] instead of sleeping.
#[derive(Debug)]
pub struct MockDelay {
    pub clock: MockClock,
    pub waits: Vec<u32>,
}

impl MockDelay {
    pub fn new(clock: &MockClock) -> Self {
        Self {
            clock: clock.clone(),
            waits: Vec::new(),
        }
    }
}

impl Delay for MockDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.waits.push(ms);
        self.clock.advance(u64::from(ms));
    }
}

/// Watchdog that counts feeds and optionally raises a cancel flag.
#[derive(Debug, Default)]
pub struct MockWatchdog<'a> {
    pub feeds: usize,
    pub cancel_after: Option<(usize, &'a AtomicBool)>,
}

impl Watchdog for MockWatchdog<'_> {
    fn feed(&mut self) {
        self.feeds += 1;
        if let Some((after, flag)) = self.cancel_after {
            if self.feeds >= after {
                flag.store(true, Ordering::Relaxed);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MockProvisioning {
    pub resets: usize,
}

impl ProvisioningReset for MockProvisioning {
    fn reset_settings(&mut self) {
        self.resets += 1;
    }
}

// ========================
// Transport
// ========================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectCall {
    pub client_id: String,
    pub credentials: Option<(String, String)>,
}

/// Scripted broker connection that records every request.
#[derive(Debug)]
pub struct MockTransport {
    pub connected: bool,
    /// Upcoming handshakes that fail with `failure`.
    pub fail_connects: usize,
    pub failure: DisconnectReason,
    pub drop_reason: DisconnectReason,
    pub reject_publish: bool,
    pub reject_subscribe: bool,
    pub poll_error: Option<DisconnectReason>,
    pub inbound: VecDeque<InboundMessage>,
    pub address: Option<String>,

    pub connects: Vec<ConnectCall>,
    pub published: Vec<(String, Vec<u8>)>,
    pub subscribed: Vec<String>,
    pub polls: usize,
    /// Every trait method call, including queries.
    pub calls: Cell<usize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            connected: false,
            fail_connects: 0,
            failure: DisconnectReason::ConnectFailed,
            drop_reason: DisconnectReason::Disconnected,
            reject_publish: false,
            reject_subscribe: false,
            poll_error: None,
            inbound: VecDeque::new(),
            address: None,
            connects: Vec::new(),
            published: Vec::new(),
            subscribed: Vec::new(),
            polls: 0,
            calls: Cell::new(0),
        }
    }

    pub fn failing(times: usize, failure: DisconnectReason) -> Self {
        Self {
            fail_connects: times,
            failure,
            ..Self::new()
        }
    }

    /// Simulate the broker going away.
    pub fn drop_connection(&mut self, reason: DisconnectReason) {
        self.connected = false;
        self.drop_reason = reason;
    }

    pub fn push_inbound(&mut self, topic: &str, payload: &[u8]) {
        self.inbound.push_back(InboundMessage {
            topic: heapless::String::try_from(topic).unwrap(),
            payload: heapless::Vec::from_slice(payload).unwrap(),
        });
    }

    fn count(&self) {
        self.calls.set(self.calls.get() + 1);
    }
}

impl Transport for MockTransport {
    fn connect(
        &mut self,
        client_id: &str,
        credentials: Option<&Credentials>,
    ) -> Result<(), DisconnectReason> {
        self.count();
        self.connects.push(ConnectCall {
            client_id: client_id.to_string(),
            credentials: credentials.map(|c| (c.username().to_string(), c.password().to_string())),
        });
        if self.fail_connects > 0 {
            self.fail_connects -= 1;
            self.connected = false;
            self.drop_reason = self.failure;
            return Err(self.failure);
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.count();
        self.connected
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        self.count();
        self.published.push((topic.to_string(), payload.to_vec()));
        self.connected && !self.reject_publish
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        self.count();
        self.subscribed.push(topic.to_string());
        self.connected && !self.reject_subscribe
    }

    fn poll(&mut self) -> Result<Option<InboundMessage>, DisconnectReason> {
        self.count();
        self.polls += 1;
        if let Some(reason) = self.poll_error.take() {
            self.drop_connection(reason);
            return Err(reason);
        }
        Ok(self.inbound.pop_front())
    }

    fn disconnect_reason(&self) -> DisconnectReason {
        self.count();
        self.drop_reason
    }

    fn local_address(&self) -> Option<&str> {
        self.count();
        self.address.as_deref()
    }
}
