//! Endpoint reputation cache
//!
//! Remembers which destination endpoints were recently seen receiving a
//! connection-initiation packet through this relay. Those endpoints are
//! "unrestricted": their return traffic passes the outermost hop without the
//! unknown-sender rate limit.
//!
//! Entries sit in an index-based LRU list; the least recently used entry is
//! evicted first when the cache is full.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Default window an unrestricted mark stays valid (60 seconds)
pub const DEFAULT_UNRESTRICTED_RETENTION: Duration = Duration::from_secs(60);

/// Default maximum number of tracked endpoints
pub const DEFAULT_CAPACITY: usize = 1000;

struct Node {
    address: SocketAddr,
    unrestricted_at: Option<Instant>,
    last_seen: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Bounded LRU map of endpoint → unrestricted timestamp
pub struct EndpointCache {
    index: HashMap<SocketAddr, usize>,
    nodes: Vec<Node>,
    free: Vec<usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    retention: Duration,
    capacity: usize,
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_UNRESTRICTED_RETENTION, DEFAULT_CAPACITY)
    }

    pub fn with_config(retention: Duration, capacity: usize) -> Self {
        Self {
            index: HashMap::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            retention,
            capacity: capacity.max(1),
        }
    }

    /// Record traffic towards `address`, marking it unrestricted when `unrestricted` is set
    pub fn observe(&mut self, address: SocketAddr, unrestricted: bool, now: Instant) {
        let slot = match self.index.get(&address) {
            Some(&slot) => {
                self.unlink(slot);
                slot
            }
            None => self.allocate(address, now),
        };

        let node = &mut self.nodes[slot];
        node.last_seen = now;
        if unrestricted {
            node.unrestricted_at = Some(now);
        }
        self.push_front(slot);

        while self.index.len() > self.capacity {
            self.evict_oldest();
        }
    }

    /// Whether `address` was marked unrestricted within the retention window
    pub fn is_unrestricted(&mut self, address: &SocketAddr, now: Instant) -> bool {
        let Some(&slot) = self.index.get(address) else {
            return false;
        };

        let fresh = self.nodes[slot]
            .unrestricted_at
            .map(|at| now.saturating_duration_since(at) <= self.retention)
            .unwrap_or(false);

        if fresh {
            self.unlink(slot);
            self.push_front(slot);
        }
        fresh
    }

    pub fn contains(&self, address: &SocketAddr) -> bool {
        self.index.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Drop entries not seen within the retention window. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let stale: Vec<usize> = self
            .index
            .values()
            .copied()
            .filter(|&slot| now.saturating_duration_since(self.nodes[slot].last_seen) > self.retention)
            .collect();

        for slot in &stale {
            self.release(*slot);
        }
        stale.len()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    fn allocate(&mut self, address: SocketAddr, now: Instant) -> usize {
        let node = Node {
            address,
            unrestricted_at: None,
            last_seen: now,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.index.insert(address, slot);
        slot
    }

    fn evict_oldest(&mut self) {
        if let Some(tail) = self.tail {
            self.release(tail);
        }
    }

    fn release(&mut self, slot: usize) {
        self.unlink(slot);
        let address = self.nodes[slot].address;
        self.index.remove(&address);
        self.free.push(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = &self.nodes[slot];
            (node.prev, node.next)
        };

        match prev {
            Some(p) => self.nodes[p].next = next,
            None if self.head == Some(slot) => self.head = next,
            None => {}
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None if self.tail == Some(slot) => self.tail = prev,
            None => {}
        }

        let node = &mut self.nodes[slot];
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, slot: usize) {
        self.nodes[slot].next = self.head;
        self.nodes[slot].prev = None;
        if let Some(old_head) = self.head {
            self.nodes[old_head].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }
}

impl Default for EndpointCache {
    fn default() -> Self {
        Self::new()
    }
}
