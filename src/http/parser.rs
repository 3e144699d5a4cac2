//! Incremental HTTP/1.1 head parser.
//!
//! The parser consumes whatever bytes have accumulated in the input buffer
//! and emits the (possibly rewritten) head into the output buffer, one
//! CRLF-terminated line at a time. It never sees a complete message: a
//! line, a CRLF, or even a single chunk-size digit may be split across
//! receive boundaries, so every decision point can defer until the next
//! chunk arrives. Request heads get the hop headers (`Via`,
//! `X-Forwarded-For`) rewritten on the way through; everything else is
//! copied verbatim. Body bytes are never copied here: the session forwards
//! them by swapping buffers, and [`HttpParser::parse_body`] only watches
//! the stream to find the message end.

use std::net::SocketAddr;

use crate::http::chunked::ChunkState;
use crate::proxy::buffer::IoBuffer;

pub const CRLF: &[u8] = b"\r\n";

/// Verdict of a parser step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// The message is malformed; terminate the session.
    Terminate,
    /// More input is needed to finish the current phase.
    Continue,
    /// The current phase is complete; move to the next one.
    Proceed,
}

/// Which line the parser expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    RequestLine,
    RequestHeader,
    ResponseLine,
    ResponseHeader,
}

pub struct HttpParser {
    line_kind: LineKind,
    /// Offset into the input window of the first unconsumed line. Stable
    /// across calls because the input buffer is never drained mid-head.
    line_start: usize,

    pub method: Vec<u8>,
    pub request_uri: Vec<u8>,
    pub http_version: Vec<u8>,
    /// Request version as `major * 1000 + minor`.
    pub request_version: u16,
    /// Response version as `major * 1000 + minor`.
    pub response_version: u16,
    pub host: Vec<u8>,
    pub port: u16,
    pub status_code: u16,
    pub reason_phrase: Vec<u8>,
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub keep_alive: bool,
    pub force_close: bool,
    pub no_transform: bool,

    /// Captured `Via` header line (with CRLF), withheld from the verbatim
    /// copy so it can be merged or passed through at head end.
    via_line: Option<Vec<u8>>,
    /// Captured `X-Forwarded-For` line, handled like `via_line`.
    forwarded_line: Option<Vec<u8>>,

    pub(crate) chunk_state: ChunkState,
    /// Bytes remaining in the current body chunk (or the whole identity
    /// body).
    pub(crate) skip_chunk: u64,
    /// Chunk-size accumulator carried across receive boundaries.
    pub(crate) marker_hoarder: Option<u64>,
    /// A zero-length chunk marker has been seen.
    pub(crate) body_end: bool,

    /// Local socket address text, appended to outgoing `Via`.
    local_addr: String,
    /// Peer socket address text, appended to outgoing `X-Forwarded-For`.
    peer_addr: String,
}

impl HttpParser {
    pub fn new(local: SocketAddr, peer: SocketAddr) -> Self {
        Self {
            line_kind: LineKind::RequestLine,
            line_start: 0,
            method: Vec::new(),
            request_uri: Vec::new(),
            http_version: Vec::new(),
            request_version: 0,
            response_version: 0,
            host: Vec::new(),
            port: 80,
            status_code: 0,
            reason_phrase: Vec::new(),
            content_length: None,
            chunked: false,
            keep_alive: false,
            force_close: false,
            no_transform: false,
            via_line: None,
            forwarded_line: None,
            chunk_state: ChunkState::NoSearch,
            skip_chunk: 0,
            marker_hoarder: None,
            body_end: false,
            local_addr: local.ip().to_string(),
            peer_addr: peer.ip().to_string(),
        }
    }

    /// Rearms the parser for the next request on a kept-alive connection.
    pub fn restart_request(&mut self) {
        self.line_kind = LineKind::RequestLine;
        self.line_start = 0;
        self.method.clear();
        self.request_uri.clear();
        self.http_version.clear();
        self.request_version = 0;
        self.response_version = 0;
        self.host.clear();
        self.port = 80;
        self.status_code = 0;
        self.reason_phrase.clear();
        self.content_length = None;
        self.chunked = false;
        self.keep_alive = false;
        self.force_close = false;
        self.no_transform = false;
        self.via_line = None;
        self.forwarded_line = None;
        self.reset_body_state();
    }

    /// Switches to the response phase after the request has been relayed.
    pub fn start_response(&mut self) {
        self.line_kind = LineKind::ResponseLine;
        self.line_start = 0;
        self.response_version = 0;
        self.status_code = 0;
        self.reason_phrase.clear();
        self.content_length = None;
        self.chunked = false;
        self.reset_body_state();
    }

    fn reset_body_state(&mut self) {
        self.chunk_state = ChunkState::NoSearch;
        self.skip_chunk = 0;
        self.marker_hoarder = None;
        self.body_end = false;
    }

    /// Advances through the head, consuming complete lines from `input`
    /// and emitting the rewritten head into `output`.
    ///
    /// On [`ParseStatus::Proceed`] the head bytes have been dropped from
    /// the front of `input`, leaving only body bytes for zero-copy
    /// forwarding.
    pub fn parse_head(&mut self, input: &mut IoBuffer, output: &mut IoBuffer) -> ParseStatus {
        loop {
            let Some(line_end) = self.next_line_end(input.as_slice()) else {
                return ParseStatus::Continue;
            };
            let status = {
                let line = &input.as_slice()[self.line_start..line_end];
                match self.line_kind {
                    LineKind::RequestLine => self.parse_request_line(line, output),
                    LineKind::RequestHeader => self.parse_request_header(line, output),
                    LineKind::ResponseLine => self.parse_response_line(line, output),
                    LineKind::ResponseHeader => self.parse_response_header(line, output),
                }
            };
            match status {
                ParseStatus::Continue => self.line_start = line_end,
                ParseStatus::Proceed => {
                    input.shrink_front(line_end);
                    self.line_start = 0;
                    return ParseStatus::Proceed;
                }
                ParseStatus::Terminate => return ParseStatus::Terminate,
            }
        }
    }

    /// Finds the end (past the CRLF) of the next complete logical line.
    ///
    /// Header lines fold: a CRLF followed by SP or HTAB extends the line.
    /// A header CRLF sitting exactly at the window end is not accepted
    /// yet, because only the next byte can tell whether the line
    /// continues. The first line and the bare-CRLF head terminator are
    /// never deferred.
    fn next_line_end(&self, buf: &[u8]) -> Option<usize> {
        let mut from = self.line_start;
        loop {
            let crlf = find_crlf(&buf[from..]).map(|i| from + i)?;
            let end = crlf + CRLF.len();
            let first_line = matches!(
                self.line_kind,
                LineKind::RequestLine | LineKind::ResponseLine
            );
            if first_line || crlf == self.line_start {
                return Some(end);
            }
            if end == buf.len() {
                return None;
            }
            match buf[end] {
                b' ' | b'\t' => from = end,
                _ => return Some(end),
            }
        }
    }

    fn parse_request_line(&mut self, line: &[u8], output: &mut IoBuffer) -> ParseStatus {
        let body = &line[..line.len() - CRLF.len()];
        let Some(sp1) = body.iter().position(|&b| b == b' ') else {
            tracing::debug!("request line has no space after the method");
            return ParseStatus::Terminate;
        };
        let rest = &body[sp1 + 1..];
        let Some(sp2) = rest.iter().position(|&b| b == b' ') else {
            tracing::debug!("request line has no space after the request-URI");
            return ParseStatus::Terminate;
        };
        let version = &rest[sp2 + 1..];
        if version.is_empty() {
            tracing::debug!("request line has no HTTP version");
            return ParseStatus::Terminate;
        }
        let Some(numeric) = parse_http_version(version) else {
            tracing::debug!("request line has a malformed HTTP version");
            return ParseStatus::Terminate;
        };

        self.method = body[..sp1].to_vec();
        self.request_uri = rest[..sp2].to_vec();
        self.http_version = version.to_vec();
        self.request_version = numeric;
        if numeric == 1000 {
            // HTTP/1.0 closes by default unless the response says otherwise
            self.force_close = true;
        }

        if !output.append(line) {
            tracing::error!("not enough space in the output buffer");
            return ParseStatus::Terminate;
        }
        self.line_kind = LineKind::RequestHeader;
        ParseStatus::Continue
    }

    fn parse_request_header(&mut self, line: &[u8], output: &mut IoBuffer) -> ParseStatus {
        if line.len() == CRLF.len() {
            // head terminator: inject hop headers before the final CRLF
            if !self.emit_hop_headers(output) || !output.append(CRLF) {
                tracing::error!("not enough space in the output buffer");
                return ParseStatus::Terminate;
            }
            self.prepare_body_state();
            return ParseStatus::Proceed;
        }

        let Some(colon) = line.iter().position(|&b| b == b':') else {
            tracing::debug!("header line has no colon");
            return ParseStatus::Terminate;
        };
        let name = &line[..colon];
        let value = trim_lwsp(&line[colon + 1..line.len() - CRLF.len()]);

        if name.eq_ignore_ascii_case(b"via") {
            self.via_line = Some(line.to_vec());
            return ParseStatus::Continue;
        }
        if name.eq_ignore_ascii_case(b"x-forwarded-for") {
            self.forwarded_line = Some(line.to_vec());
            return ParseStatus::Continue;
        }

        if name.eq_ignore_ascii_case(b"host") {
            if self.parse_host(value) == ParseStatus::Terminate {
                return ParseStatus::Terminate;
            }
        } else if name.eq_ignore_ascii_case(b"content-length") {
            let Some(length) = parse_decimal(value) else {
                tracing::debug!("malformed Content-Length");
                return ParseStatus::Terminate;
            };
            self.content_length = Some(length);
        } else if name.eq_ignore_ascii_case(b"transfer-encoding") {
            if value.eq_ignore_ascii_case(b"chunked") {
                self.chunked = true;
            }
        } else if name.eq_ignore_ascii_case(b"cache-control") {
            if value.eq_ignore_ascii_case(b"no-transform") {
                self.no_transform = true;
            }
        } else if name.eq_ignore_ascii_case(b"connection") {
            if value.eq_ignore_ascii_case(b"close") {
                self.force_close = true;
            } else if value.eq_ignore_ascii_case(b"keep-alive") {
                self.force_close = false;
            }
        }

        if !output.append(line) {
            tracing::error!("not enough space in the output buffer");
            return ParseStatus::Terminate;
        }
        ParseStatus::Continue
    }

    fn parse_host(&mut self, value: &[u8]) -> ParseStatus {
        if value.is_empty() {
            tracing::debug!("Host header has no value");
            return ParseStatus::Terminate;
        }
        match value.iter().position(|&b| b == b':') {
            Some(colon) => {
                self.host = value[..colon].to_vec();
                let port = &value[colon + 1..];
                if !port.is_empty() {
                    let Some(port) = parse_u16(port) else {
                        tracing::debug!("Host header has a malformed port");
                        return ParseStatus::Terminate;
                    };
                    self.port = port;
                }
            }
            None => self.host = value.to_vec(),
        }
        ParseStatus::Continue
    }

    /// Emits the `Via` and `X-Forwarded-For` lines at head end.
    ///
    /// Without `Cache-Control: no-transform` the received lines get this
    /// hop appended (or fresh lines are created); with it they pass
    /// through untouched and nothing new is added.
    #[must_use]
    fn emit_hop_headers(&mut self, output: &mut IoBuffer) -> bool {
        if self.no_transform {
            if let Some(line) = &self.via_line {
                if !output.append(line) {
                    return false;
                }
            }
            if let Some(line) = &self.forwarded_line {
                if !output.append(line) {
                    return false;
                }
            }
            return true;
        }

        let protocol = via_protocol(&self.http_version);
        let ok = match &self.via_line {
            Some(line) => {
                output.append(&line[..line.len() - CRLF.len()])
                    && output.append(b", ")
                    && output.append(protocol)
                    && output.append(b" ")
                    && output.append_str(&self.local_addr)
                    && output.append(CRLF)
            }
            None => {
                output.append(b"Via: ")
                    && output.append(protocol)
                    && output.append(b" ")
                    && output.append_str(&self.local_addr)
                    && output.append(CRLF)
            }
        };
        if !ok {
            return false;
        }
        match &self.forwarded_line {
            Some(line) => {
                output.append(&line[..line.len() - CRLF.len()])
                    && output.append(b", ")
                    && output.append_str(&self.peer_addr)
                    && output.append(CRLF)
            }
            None => {
                output.append(b"X-Forwarded-For: ")
                    && output.append_str(&self.peer_addr)
                    && output.append(CRLF)
            }
        }
    }

    fn parse_response_line(&mut self, line: &[u8], output: &mut IoBuffer) -> ParseStatus {
        let body = &line[..line.len() - CRLF.len()];
        let Some(sp1) = body.iter().position(|&b| b == b' ') else {
            tracing::debug!("status line has no space after the version");
            return ParseStatus::Terminate;
        };
        let Some(numeric) = parse_http_version(&body[..sp1]) else {
            tracing::debug!("status line has a malformed HTTP version");
            return ParseStatus::Terminate;
        };
        let rest = &body[sp1 + 1..];
        let (status, reason) = match rest.iter().position(|&b| b == b' ') {
            Some(sp2) => (&rest[..sp2], &rest[sp2 + 1..]),
            None => (rest, &rest[rest.len()..]),
        };
        let Some(status) = parse_u16(status) else {
            tracing::debug!("status line has a malformed status code");
            return ParseStatus::Terminate;
        };

        self.response_version = numeric;
        self.status_code = status;
        self.reason_phrase = reason.to_vec();
        if numeric >= 1001 && !self.force_close {
            self.keep_alive = true;
        }

        if !output.append(line) {
            tracing::error!("not enough space in the output buffer");
            return ParseStatus::Terminate;
        }
        self.line_kind = LineKind::ResponseHeader;
        ParseStatus::Continue
    }

    fn parse_response_header(&mut self, line: &[u8], output: &mut IoBuffer) -> ParseStatus {
        if !output.append(line) {
            tracing::error!("not enough space in the output buffer");
            return ParseStatus::Terminate;
        }
        if line.len() == CRLF.len() {
            self.prepare_body_state();
            return ParseStatus::Proceed;
        }

        let Some(colon) = line.iter().position(|&b| b == b':') else {
            tracing::debug!("header line has no colon");
            return ParseStatus::Terminate;
        };
        let name = &line[..colon];
        let value = trim_lwsp(&line[colon + 1..line.len() - CRLF.len()]);

        if name.eq_ignore_ascii_case(b"content-length") {
            let Some(length) = parse_decimal(value) else {
                tracing::debug!("malformed Content-Length");
                return ParseStatus::Terminate;
            };
            self.content_length = Some(length);
        } else if name.eq_ignore_ascii_case(b"transfer-encoding") {
            if value.eq_ignore_ascii_case(b"chunked") {
                self.chunked = true;
            }
        } else if name.eq_ignore_ascii_case(b"connection") {
            if value.eq_ignore_ascii_case(b"close") {
                self.keep_alive = false;
            } else if value.eq_ignore_ascii_case(b"keep-alive") && !self.force_close {
                self.keep_alive = true;
            }
        }
        ParseStatus::Continue
    }

    fn prepare_body_state(&mut self) {
        if self.chunked {
            self.chunk_state = ChunkState::NoSearch;
            self.marker_hoarder = None;
            self.body_end = false;
            self.skip_chunk = 0;
        } else {
            self.skip_chunk = self.content_length.unwrap_or(0);
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF.len()).position(|w| w == CRLF)
}

fn trim_lwsp(value: &[u8]) -> &[u8] {
    let skip = value
        .iter()
        .take_while(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .count();
    &value[skip..]
}

/// Parses `HTTP/major.minor` into `major * 1000 + minor`.
fn parse_http_version(version: &[u8]) -> Option<u16> {
    let rest = version.strip_prefix(b"HTTP/")?;
    let dot = rest.iter().position(|&b| b == b'.')?;
    let major = parse_u16(&rest[..dot])?;
    let minor = parse_u16(&rest[dot + 1..])?;
    major.checked_mul(1000)?.checked_add(minor)
}

/// The protocol element placed into `Via`: the version with its scheme
/// prefix dropped (`HTTP/1.1` becomes `1.1`).
fn via_protocol(version: &[u8]) -> &[u8] {
    version.strip_prefix(b"HTTP/").unwrap_or(version)
}

fn parse_decimal(value: &[u8]) -> Option<u64> {
    if value.is_empty() {
        return None;
    }
    let mut acc: u64 = 0;
    for &b in value {
        if !b.is_ascii_digit() {
            return None;
        }
        acc = acc.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
    }
    Some(acc)
}

fn parse_u16(value: &[u8]) -> Option<u16> {
    parse_decimal(value)?.try_into().ok()
}
