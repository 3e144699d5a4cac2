//! Event-loop endpoint: a non-blocking socket plus its armed events.
//!
//! The reactor does the actual readiness tracking; an [`Endpoint`] only
//! remembers which of {read, write} the session currently wants and
//! exposes the start/stop operations the state machines are written in
//! terms of. An endpoint with nothing armed (or no socket) never wakes
//! its session.

use std::future::pending;
use std::io;
use std::ops::{BitAndAssign, BitOrAssign, Not};

use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;

/// Readiness event mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Events(u8);

impl Events {
    pub const NONE: Events = Events(0);
    pub const READ: Events = Events(1);
    pub const WRITE: Events = Events(2);

    pub fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) {
        self.0 |= rhs.0;
    }
}

impl BitAndAssign for Events {
    fn bitand_assign(&mut self, rhs: Events) {
        self.0 &= rhs.0;
    }
}

impl Not for Events {
    type Output = Events;

    fn not(self) -> Events {
        Events(!self.0)
    }
}

/// Result of the one-byte probe used once payload reads are no longer
/// expected on a socket.
#[derive(Debug)]
pub enum Probe {
    /// The peer sent data where none belongs.
    Data,
    /// The peer shut down its half of the connection.
    Shutdown,
    /// Nothing to read after all.
    WouldBlock,
    /// The connection failed.
    Error(io::Error),
}

pub struct Endpoint {
    stream: Option<TcpStream>,
    events: Events,
}

impl Endpoint {
    /// Endpoint over an accepted or connected socket.
    pub fn connected(stream: TcpStream, events: Events) -> Self {
        Self {
            stream: Some(stream),
            events,
        }
    }

    /// Endpoint with no socket yet (a backend before its first connect).
    pub fn idle() -> Self {
        Self {
            stream: None,
            events: Events::NONE,
        }
    }

    /// Adopts a freshly connected socket.
    pub fn open(&mut self, stream: TcpStream, events: Events) {
        self.stream = Some(stream);
        self.events = events;
    }

    /// Closes the socket, half-closing the write side first so bytes the
    /// kernel still holds get a chance to drain.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Ok(stream) = stream.into_std() {
                let _ = stream.shutdown(std::net::Shutdown::Write);
            }
        }
        self.events = Events::NONE;
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    pub fn start_events(&mut self, events: Events) {
        if self.stream.is_some() {
            self.events |= events;
        }
    }

    pub fn stop_events(&mut self, events: Events) {
        self.events &= !events;
    }

    pub fn start_only(&mut self, events: Events) {
        if self.stream.is_some() {
            self.events = events;
        }
    }

    pub fn stop_all(&mut self) {
        self.events = Events::NONE;
    }

    pub fn wants_read(&self) -> bool {
        self.events.contains(Events::READ)
    }

    pub fn wants_write(&self) -> bool {
        self.events.contains(Events::WRITE)
    }

    /// Whether this endpoint can wake the session at all.
    pub fn armed(&self) -> bool {
        self.stream.is_some() && self.events != Events::NONE
    }

    /// Suspends until one of the armed events is ready. Never resolves on
    /// an endpoint with nothing armed.
    pub async fn ready(&self) -> io::Result<Ready> {
        let Some(stream) = &self.stream else {
            return pending().await;
        };
        let interest = match (self.wants_read(), self.wants_write()) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (true, false) => Interest::READABLE,
            (false, true) => Interest::WRITABLE,
            (false, false) => return pending().await,
        };
        stream.ready(interest).await
    }

    /// Reads a single byte to find out what a read wakeup means on a
    /// socket that should be quiet.
    pub fn drain_probe(&self) -> Probe {
        let Some(stream) = &self.stream else {
            return Probe::Shutdown;
        };
        let mut byte = [0u8; 1];
        match stream.try_read(&mut byte) {
            Ok(0) => Probe::Shutdown,
            Ok(_) => Probe::Data,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Probe::WouldBlock,
            Err(e) => Probe::Error(e),
        }
    }
}
