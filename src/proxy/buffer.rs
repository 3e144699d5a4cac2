//! Fixed-region I/O buffer with cursor semantics.
//!
//! An [`IoBuffer`] owns a storage region of fixed capacity and exposes a
//! window `storage[start..end]` over it. Received bytes grow the window at
//! the back, sent bytes shrink it at the front, and two buffers can be
//! exchanged wholesale without copying a single payload byte: the session
//! machinery swaps buffers between its two endpoints instead of moving data.

use std::io;

use tokio::net::TcpStream;

/// Outcome of a non-blocking receive or send on an [`IoBuffer`].
#[derive(Debug)]
pub enum IoStatus {
    /// Bytes were transferred.
    Ok(usize),
    /// No free space remains in the region; nothing was read.
    Full,
    /// The peer shut down its half of the connection.
    Shutdown,
    /// The socket is not ready; retry on the next readiness event.
    WouldBlock,
    /// Unrecoverable I/O error.
    Error(io::Error),
}

pub struct IoBuffer {
    storage: Box<[u8]>,
    start: usize,
    end: usize,
}

impl IoBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Bytes remaining between the window end and the region end.
    pub fn free_size(&self) -> usize {
        self.storage.len() - self.end
    }

    /// Empties the window and moves both cursors back to the region base.
    pub fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Current window contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.start..self.end]
    }

    /// Drops `n` bytes from the front of the window.
    pub fn shrink_front(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.start += n;
    }

    /// Appends raw bytes, refusing rather than overflowing the region.
    #[must_use]
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.free_size() {
            return false;
        }
        self.storage[self.end..self.end + bytes.len()].copy_from_slice(bytes);
        self.end += bytes.len();
        true
    }

    #[must_use]
    pub fn append_str(&mut self, s: &str) -> bool {
        self.append(s.as_bytes())
    }

    /// Appends an unsigned integer formatted in decimal.
    #[must_use]
    pub fn append_uint(&mut self, n: u64) -> bool {
        let mut digits = [0u8; 20];
        let mut i = digits.len();
        let mut v = n;
        loop {
            i -= 1;
            digits[i] = b'0' + (v % 10) as u8;
            v /= 10;
            if v == 0 {
                break;
            }
        }
        self.append(&digits[i..])
    }

    /// Receives once from `stream` into the free tail of the region.
    ///
    /// Maps the syscall result the way the session machine expects: a zero
    /// read is [`IoStatus::Shutdown`], `EWOULDBLOCK` is
    /// [`IoStatus::WouldBlock`], and a full region reports
    /// [`IoStatus::Full`] without touching the socket.
    pub fn recv(&mut self, stream: &TcpStream) -> IoStatus {
        if self.free_size() == 0 {
            return IoStatus::Full;
        }
        match stream.try_read(&mut self.storage[self.end..]) {
            Ok(0) => IoStatus::Shutdown,
            Ok(n) => {
                self.end += n;
                IoStatus::Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => IoStatus::WouldBlock,
            Err(e) => IoStatus::Error(e),
        }
    }

    /// Sends once from the front of the window to `stream`.
    pub fn send(&mut self, stream: &TcpStream) -> IoStatus {
        if self.is_empty() {
            return IoStatus::Ok(0);
        }
        match stream.try_write(&self.storage[self.start..self.end]) {
            Ok(0) => IoStatus::Shutdown,
            Ok(n) => {
                self.start += n;
                IoStatus::Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => IoStatus::WouldBlock,
            Err(e) => IoStatus::Error(e),
        }
    }

    /// Exchanges two buffers by value. The storage pointers swap; no byte
    /// is copied.
    pub fn swap(&mut self, other: &mut IoBuffer) {
        std::mem::swap(self, other);
    }
}
