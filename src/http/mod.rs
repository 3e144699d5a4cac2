//! HTTP/1.1 protocol implementation.
//!
//! This module implements the incremental message parser that drives the
//! proxy: it understands exactly as much HTTP as a forwarder needs and
//! nothing more.
//!
//! # Submodules
//!
//! - **`parser`**: the head parser. Advances line by line through request
//!   and response heads as bytes arrive, rewriting the hop headers
//!   (`Via`, `X-Forwarded-For`) for requests and passing responses
//!   through.
//! - **`chunked`**: body framing. Identity bodies are a countdown;
//!   chunked bodies run a small state machine over size markers, chunk
//!   separators and trailers, tolerating any split across receive
//!   boundaries.
//!
//! # Phases
//!
//! One parser instance serves a whole session and moves through phases:
//!
//! ```text
//! request line -> request headers -> request body
//!        (start_response)
//! status line  -> response headers -> response body
//!        (restart_request, on keep-alive)
//! ```
//!
//! Every phase reports one of three verdicts: `Continue` (feed me more
//! bytes), `Proceed` (phase done), or `Terminate` (the message is broken
//! and the session must go away).

pub mod chunked;
pub mod parser;

pub use chunked::ChunkState;
pub use parser::{HttpParser, ParseStatus};
