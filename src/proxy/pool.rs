//! Per-worker session accounting.
//!
//! Sessions are plain task-owned values in this design, so the pool does
//! not hand out memory; it bounds how many sessions one worker may run
//! at once. A [`PoolPermit`] is held for the life of a session and gives
//! the slot back when dropped, which makes release idempotent for free.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// The pool has no free slots; the new connection must be rejected.
#[derive(Debug)]
pub struct PoolExhausted;

impl fmt::Display for PoolExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("session pool exhausted")
    }
}

impl std::error::Error for PoolExhausted {}

#[derive(Debug)]
pub struct SessionPool {
    capacity: usize,
    free: Cell<usize>,
}

impl SessionPool {
    pub fn new(capacity: usize) -> Rc<Self> {
        Rc::new(Self {
            capacity,
            free: Cell::new(capacity),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_slots(&self) -> usize {
        self.free.get()
    }

    /// Claims a slot for a new session.
    pub fn acquire(self: &Rc<Self>) -> Result<PoolPermit, PoolExhausted> {
        let free = self.free.get();
        if free == 0 {
            return Err(PoolExhausted);
        }
        self.free.set(free - 1);
        Ok(PoolPermit {
            pool: Rc::clone(self),
        })
    }
}

/// RAII slot claim; dropping it returns the slot to its pool.
#[derive(Debug)]
pub struct PoolPermit {
    pool: Rc<SessionPool>,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.pool.free.set(self.pool.free.get() + 1);
    }
}
