//! One proxy session: a frontend (client side), a backend (origin side),
//! two fixed buffers and the progress machine that shuttles bytes between
//! them.
//!
//! The request head is received into the frontend buffer and parsed as it
//! arrives; the parser emits the rewritten head into the backend buffer.
//! Once the head is complete the backend connects and starts writing.
//! Request body bytes keep landing in the frontend buffer; whenever the
//! backend drains its own buffer it swaps buffers with the frontend and
//! carries on, so payload bytes are never copied. When the request is
//! fully relayed the roles flip: the backend receives the response (the
//! head is parsed into the frontend buffer, body bytes stay where they
//! land) and the frontend sends, with the same swap discipline in the
//! other direction. A finished response either rearms the session for the
//! next request (keep-alive) or releases it.
//!
//! Only one side receives into a given buffer at a time and only the
//! other side drains it, which is what makes the swap safe. Whenever a
//! buffer fills up, its reader stops until the peer endpoint has made
//! room.

use std::io;
use std::rc::Rc;

use tokio::io::Ready;
use tokio::net::TcpStream;

use crate::http::parser::{HttpParser, ParseStatus};
use crate::proxy::buffer::{IoBuffer, IoStatus};
use crate::proxy::endpoint::{Endpoint, Events, Probe};
use crate::proxy::pool::PoolPermit;
use crate::proxy::resolver::Resolver;

/// Size of each of the two per-session buffer regions.
pub const BUF_SIZE: usize = 4096;

const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\
Connection: close\r\n\
Content-Type: text/plain\r\n\
\r\n";

/// Coarse position in the proxy lifecycle. The order matters: the state
/// machines compare with `<`/`>=` to tell the phases apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Progress {
    RequestStarted,
    RequestHeadFinished,
    RequestFinished,
    ResponseStarted,
    ResponseHeadFinished,
    ResponseWaitShutdown,
    ResponseFinished,
}

/// What a handler decided about the session's fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Released,
}

struct Target {
    host: Vec<u8>,
    port: u16,
}

pub struct Session {
    frontend: Endpoint,
    backend: Endpoint,
    /// Filled by client receives; drained toward the origin.
    front_buf: IoBuffer,
    /// Filled by the parser (request head) and origin receives; drained
    /// toward whichever side is sending.
    back_buf: IoBuffer,
    parser: HttpParser,
    progress: Progress,
    resolver: Rc<Resolver>,
    /// host:port of the currently connected origin, if any.
    target: Option<Target>,
    permit: Option<PoolPermit>,
    released: bool,
    spurious_reads: u32,
    spurious_writes: u32,
}

impl Session {
    pub fn new(stream: TcpStream, resolver: Rc<Resolver>, permit: PoolPermit) -> io::Result<Self> {
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            parser: HttpParser::new(local, peer),
            frontend: Endpoint::connected(stream, Events::READ),
            backend: Endpoint::idle(),
            front_buf: IoBuffer::new(BUF_SIZE),
            back_buf: IoBuffer::new(BUF_SIZE),
            progress: Progress::RequestStarted,
            resolver,
            target: None,
            permit: Some(permit),
            released: false,
            spurious_reads: 0,
            spurious_writes: 0,
        })
    }

    /// Drives the session until it is released.
    pub async fn run(mut self) {
        loop {
            let front_armed = self.frontend.armed();
            let back_armed = self.backend.armed();
            if !front_armed && !back_armed {
                break;
            }
            let flow = tokio::select! {
                ready = self.frontend.ready(), if front_armed => match ready {
                    Ok(ready) => self.frontend_ready(ready).await,
                    Err(e) => {
                        tracing::debug!(error = %e, "frontend readiness failed");
                        self.release()
                    }
                },
                ready = self.backend.ready(), if back_armed => match ready {
                    Ok(ready) => self.backend_ready(ready),
                    Err(e) => {
                        tracing::debug!(error = %e, "backend readiness failed");
                        self.release()
                    }
                },
            };
            if flow == Flow::Released {
                break;
            }
        }
    }

    async fn frontend_ready(&mut self, ready: Ready) -> Flow {
        if ready.is_readable() && self.frontend.wants_read() {
            if self.frontend_read().await == Flow::Released {
                return Flow::Released;
            }
        }
        if ready.is_writable() && self.frontend.wants_write() {
            if self.frontend_write() == Flow::Released {
                return Flow::Released;
            }
        }
        Flow::Continue
    }

    fn backend_ready(&mut self, ready: Ready) -> Flow {
        if ready.is_readable() && self.backend.wants_read() {
            if self.backend_read() == Flow::Released {
                return Flow::Released;
            }
        }
        if ready.is_writable() && self.backend.wants_write() {
            if self.backend_write() == Flow::Released {
                return Flow::Released;
            }
        }
        Flow::Continue
    }

    /// Client socket became readable.
    async fn frontend_read(&mut self) -> Flow {
        if self.progress >= Progress::RequestFinished {
            // the socket stays armed only so a torn connection is noticed
            return self.frontend_drain();
        }

        let before = self.front_buf.len();
        let status = match self.frontend.stream() {
            Some(stream) => self.front_buf.recv(stream),
            None => return self.release(),
        };
        match status {
            IoStatus::Full => {
                self.spurious_reads += 1;
                if self.progress < Progress::RequestHeadFinished {
                    tracing::error!("request head does not fit in one buffer");
                    return self.release();
                }
                self.frontend.stop_events(Events::READ);
                return Flow::Continue;
            }
            IoStatus::Shutdown => {
                tracing::debug!("client shutdown");
                return self.release();
            }
            IoStatus::Error(e) => {
                tracing::debug!(error = %e, "client read failed");
                return self.release();
            }
            IoStatus::WouldBlock => return Flow::Continue,
            IoStatus::Ok(_) => {}
        }

        match self.progress {
            Progress::RequestStarted => self.frontend_parse_head().await,
            Progress::RequestHeadFinished => self.frontend_parse_body(before),
            _ => Flow::Continue,
        }
    }

    async fn frontend_parse_head(&mut self) -> Flow {
        match self.parser.parse_head(&mut self.front_buf, &mut self.back_buf) {
            ParseStatus::Proceed => {}
            ParseStatus::Continue => return Flow::Continue,
            ParseStatus::Terminate => {
                tracing::error!("parsing HTTP request failed");
                return self.release();
            }
        }

        if self.parser.host.is_empty() {
            tracing::debug!("request without a Host header");
            return self.release();
        }
        tracing::debug!(
            method = %String::from_utf8_lossy(&self.parser.method),
            uri = %String::from_utf8_lossy(&self.parser.request_uri),
            host = %String::from_utf8_lossy(&self.parser.host),
            port = self.parser.port,
            content_length = ?self.parser.content_length,
            chunked = self.parser.chunked,
            force_close = self.parser.force_close,
            "request head complete"
        );

        self.progress = if self.parser.content_length == Some(0)
            || (self.parser.content_length.is_none() && !self.parser.chunked)
        {
            Progress::RequestFinished
        } else {
            Progress::RequestHeadFinished
        };

        let host = self.parser.host.clone();
        let port = self.parser.port;
        let reuse = self.backend.is_connected()
            && self
                .target
                .as_ref()
                .is_some_and(|t| t.port == port && t.host.eq_ignore_ascii_case(&host));
        if reuse {
            self.backend.start_only(Events::WRITE);
        } else if let Err(flow) = self.backend_connect(host, port).await {
            return flow;
        }

        if self.progress == Progress::RequestFinished || self.front_buf.is_empty() {
            return Flow::Continue;
        }
        // body bytes arrived together with the head
        self.frontend_parse_body(0)
    }

    /// Opens a fresh origin connection, tearing down any previous one.
    ///
    /// A connect failure after the request was fully received turns into
    /// a synthesized 502 for the client; earlier failures release the
    /// session. `Err` carries the flow the caller must return.
    async fn backend_connect(&mut self, host: Vec<u8>, port: u16) -> Result<(), Flow> {
        self.backend.close();
        self.target = None;

        let addr = match self.resolver.resolve(&host, port).await {
            Ok(addr) => addr,
            Err(e) => {
                tracing::debug!(
                    host = %String::from_utf8_lossy(&host),
                    error = %e,
                    "host resolution failed"
                );
                return Err(self.release());
            }
        };
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::debug!(%addr, "connected to origin");
                self.backend.open(stream, Events::WRITE);
                self.target = Some(Target { host, port });
                Ok(())
            }
            Err(e) => {
                if self.progress != Progress::RequestFinished {
                    tracing::debug!(%addr, error = %e, "origin connection failed");
                    return Err(self.release());
                }
                tracing::debug!(%addr, error = %e, "origin connection failed; replying 502");
                self.synthesize_bad_gateway(&e);
                Err(Flow::Continue)
            }
        }
    }

    /// Puts a `502 Bad Gateway` with the connect error text into the
    /// frontend buffer and wakes the frontend to send it.
    fn synthesize_bad_gateway(&mut self, error: &io::Error) {
        self.progress = Progress::ResponseFinished;
        self.front_buf.reset();
        self.back_buf.reset();
        let errno = error.raw_os_error().unwrap_or(0).unsigned_abs();
        let ok = self.front_buf.append(BAD_GATEWAY)
            && self.front_buf.append_str(&os_error_text(error))
            && self.front_buf.append(b" (")
            && self.front_buf.append_uint(u64::from(errno))
            && self.front_buf.append(b")");
        debug_assert!(ok, "502 response must fit an empty buffer");
        self.backend.stop_all();
        self.backend.close();
        self.frontend.start_only(Events::WRITE);
    }

    fn frontend_parse_body(&mut self, from: usize) -> Flow {
        let (status, _consumed) = self.parser.parse_body(&self.front_buf.as_slice()[from..]);
        match status {
            ParseStatus::Proceed => {
                self.progress = Progress::RequestFinished;
                tracing::debug!("request body complete");
                self.backend.start_events(Events::WRITE);
                Flow::Continue
            }
            ParseStatus::Continue => {
                self.backend.start_events(Events::WRITE);
                Flow::Continue
            }
            ParseStatus::Terminate => {
                tracing::error!("parsing HTTP request body failed");
                self.release()
            }
        }
    }

    /// Read wakeup on a client socket that owes us no more payload.
    fn frontend_drain(&mut self) -> Flow {
        match self.frontend.drain_probe() {
            Probe::WouldBlock => Flow::Continue,
            Probe::Shutdown => {
                tracing::debug!("client shutdown");
                self.release()
            }
            Probe::Data => {
                tracing::debug!("unexpected data from client");
                self.release()
            }
            Probe::Error(e) => {
                tracing::debug!(error = %e, "client reset");
                self.release()
            }
        }
    }

    /// Client socket became writable.
    fn frontend_write(&mut self) -> Flow {
        if self.front_buf.is_empty() {
            if self.back_buf.is_empty() {
                if self.progress == Progress::ResponseFinished {
                    tracing::debug!(keep_alive = self.parser.keep_alive, "response finished");
                    if self.parser.keep_alive {
                        self.restart();
                        return Flow::Continue;
                    }
                    return self.release();
                }
                self.spurious_writes += 1;
                self.frontend.stop_events(Events::WRITE);
                return Flow::Continue;
            }
            self.front_buf.reset();
            self.front_buf.swap(&mut self.back_buf);
            self.backend.start_events(Events::READ);
        }

        let status = match self.frontend.stream() {
            Some(stream) => self.front_buf.send(stream),
            None => return self.release(),
        };
        match status {
            IoStatus::Shutdown => {
                tracing::debug!("client shutdown during send");
                self.release()
            }
            IoStatus::Error(e) => {
                tracing::debug!(error = %e, "client write failed");
                self.release()
            }
            _ => Flow::Continue,
        }
    }

    /// Rearms everything for the next request on the kept-alive client
    /// connection. The backend connection is kept for possible reuse.
    fn restart(&mut self) {
        self.parser.restart_request();
        self.front_buf.reset();
        self.back_buf.reset();
        self.progress = Progress::RequestStarted;
        self.frontend.start_only(Events::READ);
        self.backend.stop_all();
        tracing::debug!("session rearmed for the next request");
    }

    /// Origin socket became writable.
    fn backend_write(&mut self) -> Flow {
        if self.back_buf.is_empty() {
            if self.front_buf.is_empty() {
                if self.progress == Progress::RequestFinished {
                    // request fully relayed; turn around and await the response
                    self.back_buf.reset();
                    self.progress = Progress::ResponseStarted;
                    self.parser.start_response();
                    self.backend.start_only(Events::READ);
                } else {
                    self.spurious_writes += 1;
                    self.backend.stop_events(Events::WRITE);
                }
                return Flow::Continue;
            }
            self.back_buf.reset();
            self.back_buf.swap(&mut self.front_buf);
            self.frontend.start_events(Events::READ);
        }

        let status = match self.backend.stream() {
            Some(stream) => self.back_buf.send(stream),
            None => return self.release(),
        };
        match status {
            IoStatus::Shutdown => {
                tracing::debug!("origin shutdown during send");
                self.release()
            }
            IoStatus::Error(e) => {
                tracing::debug!(error = %e, "origin write failed");
                self.release()
            }
            _ => Flow::Continue,
        }
    }

    /// Origin socket became readable.
    fn backend_read(&mut self) -> Flow {
        let before = self.back_buf.len();
        let status = match self.backend.stream() {
            Some(stream) => self.back_buf.recv(stream),
            None => return Flow::Continue,
        };
        match status {
            IoStatus::Full => {
                self.spurious_reads += 1;
                self.backend.stop_events(Events::READ);
                return Flow::Continue;
            }
            IoStatus::Shutdown => return self.backend_shutdown(),
            IoStatus::Error(e) => {
                tracing::debug!(error = %e, "origin read failed");
                return self.release();
            }
            IoStatus::WouldBlock => return Flow::Continue,
            IoStatus::Ok(_) => {}
        }

        match self.progress {
            Progress::ResponseStarted => self.backend_parse_head(),
            Progress::ResponseHeadFinished => self.backend_parse_body(before),
            Progress::ResponseWaitShutdown => {
                // body of unknown length: pass it along until the origin
                // closes
                self.frontend.start_events(Events::WRITE);
                Flow::Continue
            }
            Progress::ResponseFinished => {
                tracing::debug!("unexpected data on a finished response");
                Flow::Continue
            }
            _ => {
                tracing::debug!("unexpected data from origin before the response phase");
                Flow::Continue
            }
        }
    }

    /// The origin closed its sending half.
    fn backend_shutdown(&mut self) -> Flow {
        match self.progress {
            Progress::ResponseWaitShutdown => {
                // close-delimited body: this is the legitimate end
                self.backend.stop_all();
                self.progress = Progress::ResponseFinished;
                tracing::debug!("origin closed; response complete");
                self.frontend.start_events(Events::WRITE);
                Flow::Continue
            }
            Progress::ResponseFinished | Progress::RequestStarted => {
                // idle keep-alive connection went away; the next request
                // will simply reconnect
                self.backend.close();
                self.target = None;
                Flow::Continue
            }
            _ => {
                tracing::debug!(progress = ?self.progress, "origin closed mid-exchange");
                self.release()
            }
        }
    }

    fn backend_parse_head(&mut self) -> Flow {
        match self.parser.parse_head(&mut self.back_buf, &mut self.front_buf) {
            ParseStatus::Proceed => {}
            ParseStatus::Continue => return Flow::Continue,
            ParseStatus::Terminate => {
                tracing::error!("parsing HTTP response failed");
                return self.release();
            }
        }

        tracing::debug!(
            status = self.parser.status_code,
            content_length = ?self.parser.content_length,
            chunked = self.parser.chunked,
            keep_alive = self.parser.keep_alive,
            "response head complete"
        );
        self.progress = if self.parser.content_length == Some(0) {
            Progress::ResponseFinished
        } else if self.parser.content_length.is_none() && !self.parser.chunked {
            if self.parser.keep_alive {
                Progress::ResponseFinished
            } else {
                Progress::ResponseWaitShutdown
            }
        } else {
            Progress::ResponseHeadFinished
        };
        self.frontend.start_only(Events::WRITE);

        match self.progress {
            Progress::ResponseFinished | Progress::ResponseWaitShutdown => Flow::Continue,
            _ if self.back_buf.is_empty() => Flow::Continue,
            // body bytes arrived together with the head
            _ => self.backend_parse_body(0),
        }
    }

    fn backend_parse_body(&mut self, from: usize) -> Flow {
        let (status, _consumed) = self.parser.parse_body(&self.back_buf.as_slice()[from..]);
        match status {
            ParseStatus::Proceed => {
                self.progress = Progress::ResponseFinished;
                tracing::debug!("response body complete");
                self.frontend.start_events(Events::WRITE);
                Flow::Continue
            }
            ParseStatus::Continue => {
                // the frontend can already forward the partial body
                self.frontend.start_events(Events::WRITE);
                Flow::Continue
            }
            ParseStatus::Terminate => {
                tracing::error!("parsing HTTP response body failed");
                self.release()
            }
        }
    }

    /// Stops everything, closes both sockets and gives the pool slot
    /// back. Safe to hit more than once; only the first call does work.
    fn release(&mut self) -> Flow {
        if !self.released {
            self.released = true;
            self.frontend.close();
            self.backend.close();
            self.permit.take();
            tracing::debug!(
                spurious_reads = self.spurious_reads,
                spurious_writes = self.spurious_writes,
                "session released"
            );
        }
        Flow::Released
    }
}

/// The plain-text message of an OS error, without the `(os error N)`
/// decoration `std` appends.
fn os_error_text(error: &io::Error) -> String {
    let text = error.to_string();
    match text.find(" (os error") {
        Some(i) => text[..i].to_string(),
        None => text,
    }
}
