//! Proxy session machinery.
//!
//! This module holds everything one session owns: the two fixed I/O
//! buffers, the event endpoints around the client and origin sockets,
//! the progress state machine, and the worker-private pool and name
//! cache that sessions draw on.

pub mod buffer;
pub mod endpoint;
pub mod pool;
pub mod resolver;
pub mod session;

pub use buffer::{IoBuffer, IoStatus};
pub use pool::{PoolExhausted, PoolPermit, SessionPool};
pub use resolver::{NameCache, Resolver};
pub use session::{Progress, Session};
