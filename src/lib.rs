//! Conduit - Forward HTTP/1.1 Proxy
//!
//! Core library for the per-session proxy machinery: the incremental
//! HTTP/1.1 parser, the buffer-swapping session state machine, and the
//! per-worker pool and name cache that back them.

pub mod config;
pub mod http;
pub mod proxy;
pub mod server;
