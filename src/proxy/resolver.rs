//! Per-worker name resolution with an LRU/TTL cache.
//!
//! Each accept worker owns one [`Resolver`]; nothing here is shared
//! across threads. The cache maps a bounded, case-insensitive domain
//! name to the IPv4 address it last resolved to, with entries expiring
//! after a configurable lifetime and the least-recently-used entry
//! evicted when the cache is full.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

/// Longest domain name the cache will hold.
pub const MAX_NAME: usize = 253;

const NIL: usize = usize::MAX;

struct Entry {
    key: Box<[u8]>,
    ip: Ipv4Addr,
    created: Instant,
    prev: usize,
    next: usize,
}

/// Bounded map from domain name to resolved address.
///
/// Recency is tracked by an index-linked list through the entry slots,
/// so promotion and eviction are O(1) and the map values are stable
/// handles rather than pointers.
pub struct NameCache {
    capacity: usize,
    lifetime: Duration,
    map: HashMap<Box<[u8]>, usize>,
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl NameCache {
    pub fn new(capacity: usize, lifetime: Duration) -> Self {
        debug_assert!(capacity > 0);
        Self {
            capacity,
            lifetime,
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Looks up `name`, returning the stored address if it has not
    /// expired and promoting the entry to most-recently-used. Expired
    /// entries are evicted on the spot. The lookup key is lowercased
    /// into a stack buffer; no allocation happens on this path.
    pub fn get(&mut self, name: &[u8]) -> Option<Ipv4Addr> {
        self.get_at(name, Instant::now())
    }

    pub fn get_at(&mut self, name: &[u8], now: Instant) -> Option<Ipv4Addr> {
        let mut lowered = [0u8; MAX_NAME];
        let key = lower_into(name, &mut lowered)?;
        let slot = *self.map.get(key)?;
        let (ip, created) = match self.slots[slot].as_ref() {
            Some(entry) => (entry.ip, entry.created),
            None => return None,
        };
        if created + self.lifetime <= now {
            self.remove(slot);
            return None;
        }
        self.unlink(slot);
        self.push_front(slot);
        Some(ip)
    }

    /// Stores `name -> ip`, evicting the least-recently-used entry when
    /// the cache is full. Overlong names are not stored.
    pub fn insert(&mut self, name: &[u8], ip: Ipv4Addr) {
        self.insert_at(name, ip, Instant::now());
    }

    pub fn insert_at(&mut self, name: &[u8], ip: Ipv4Addr, now: Instant) {
        let mut lowered = [0u8; MAX_NAME];
        let Some(key) = lower_into(name, &mut lowered) else {
            return;
        };
        if let Some(&slot) = self.map.get(key) {
            if let Some(entry) = self.slots[slot].as_mut() {
                entry.ip = ip;
                entry.created = now;
            }
            self.unlink(slot);
            self.push_front(slot);
            return;
        }
        if self.map.len() == self.capacity {
            self.remove(self.tail);
        }
        let key: Box<[u8]> = key.into();
        let entry = Entry {
            key: key.clone(),
            ip,
            created: now,
            prev: NIL,
            next: NIL,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.map.insert(key, slot);
        self.push_front(slot);
    }

    fn remove(&mut self, slot: usize) {
        if slot == NIL {
            return;
        }
        self.unlink(slot);
        if let Some(entry) = self.slots[slot].take() {
            self.map.remove(&entry.key);
        }
        self.free.push(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match &self.slots[slot] {
            Some(entry) => (entry.prev, entry.next),
            None => return,
        };
        match prev {
            NIL => {
                if self.head == slot {
                    self.head = next;
                }
            }
            p => {
                if let Some(entry) = self.slots[p].as_mut() {
                    entry.next = next;
                }
            }
        }
        match next {
            NIL => {
                if self.tail == slot {
                    self.tail = prev;
                }
            }
            n => {
                if let Some(entry) = self.slots[n].as_mut() {
                    entry.prev = prev;
                }
            }
        }
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.prev = NIL;
            entry.next = NIL;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.prev = NIL;
            entry.next = old_head;
        }
        if old_head != NIL {
            if let Some(entry) = self.slots[old_head].as_mut() {
                entry.prev = slot;
            }
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }
}

fn lower_into<'a>(name: &[u8], buf: &'a mut [u8; MAX_NAME]) -> Option<&'a [u8]> {
    if name.len() > MAX_NAME {
        return None;
    }
    for (dst, src) in buf.iter_mut().zip(name) {
        *dst = src.to_ascii_lowercase();
    }
    Some(&buf[..name.len()])
}

/// Resolver handle shared by all sessions of one worker.
pub struct Resolver {
    cache: Option<RefCell<NameCache>>,
}

impl Resolver {
    /// A `cache_capacity` of zero disables caching entirely.
    pub fn new(cache_capacity: usize, lifetime: Duration) -> Self {
        let cache =
            (cache_capacity > 0).then(|| RefCell::new(NameCache::new(cache_capacity, lifetime)));
        Self { cache }
    }

    /// Resolves `host` to an IPv4 socket address, consulting the cache
    /// first and feeding it after a successful system lookup.
    pub async fn resolve(&self, host: &[u8], port: u16) -> io::Result<SocketAddr> {
        if let Some(cache) = &self.cache {
            if let Some(ip) = cache.borrow_mut().get(host) {
                tracing::trace!(host = %String::from_utf8_lossy(host), %ip, "name cache hit");
                return Ok(SocketAddr::from((ip, port)));
            }
        }
        let text = std::str::from_utf8(host)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "host is not valid UTF-8"))?;
        let addr = tokio::net::lookup_host((text, port))
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no IPv4 address for host"))?;
        if let (Some(cache), SocketAddr::V4(v4)) = (&self.cache, &addr) {
            cache.borrow_mut().insert(host, *v4.ip());
        }
        Ok(addr)
    }
}
