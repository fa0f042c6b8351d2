//! Per-circuit bookkeeping on a relay
//!
//! One `RelayExchange` exists for every circuit passing through this node. It
//! is reachable by either of its two relay ids: the inner id (traffic from the
//! client side) and the outer id (traffic from the destination side).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::Rng;

use hopcraft_core::{EmbryoKey, ExchangeFlags, NetEndpoint, RelayId, PLAIN_RELAY_ID};

/// Attempts at drawing a fresh id pair before giving up
const ID_ALLOCATION_ATTEMPTS: usize = 64;

/// Which side of the exchange a packet arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Addressed to the inner id, travelling away from the client
    Outward,
    /// Addressed to the outer id, travelling back towards the client
    Inward,
}

#[derive(Debug, Clone)]
pub struct RelayExchange {
    pub inner_id: RelayId,
    pub outer_id: RelayId,
    /// Inner neighbour, with the relay id it uses on this link
    pub inner_endpoint: NetEndpoint,
    /// Outer neighbour, unknown until the client sets it
    pub outer_endpoint: Option<NetEndpoint>,
    /// Copied from the creating connection; outlives it
    pub embryo: EmbryoKey,
    pub flags: ExchangeFlags,
    /// Remaining forwarding quota
    pub points: i64,
    pub retention: Duration,
    /// Remote address of the connection that created the exchange
    pub owner: SocketAddr,
    pub created_at: Instant,
    pub last_access: Instant,
}

impl RelayExchange {
    pub fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_access) > self.retention
    }

    pub(crate) fn view(&self) -> ExchangeView {
        ExchangeView {
            inner_id: self.inner_id,
            outer_id: self.outer_id,
            inner_endpoint: self.inner_endpoint,
            outer_endpoint: self.outer_endpoint,
            embryo: self.embryo,
            flags: self.flags,
        }
    }
}

/// Copy of the fields the forwarding path needs once the table lock is released
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExchangeView {
    pub inner_id: RelayId,
    pub outer_id: RelayId,
    pub inner_endpoint: NetEndpoint,
    pub outer_endpoint: Option<NetEndpoint>,
    pub embryo: EmbryoKey,
    pub flags: ExchangeFlags,
}

/// Public summary of a live exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeInfo {
    pub inner_id: RelayId,
    pub outer_id: RelayId,
    pub inner_endpoint: NetEndpoint,
    pub outer_endpoint: Option<NetEndpoint>,
    pub points: i64,
}

/// Result of charging a packet against an exchange
pub(crate) enum Charge {
    Unknown,
    Exhausted,
    Pinned(ExchangeView, Direction),
}

/// All exchanges on a node, keyed by inner id with an outer-id index
#[derive(Default)]
pub(crate) struct ExchangeTable {
    by_inner: HashMap<RelayId, RelayExchange>,
    outer_to_inner: HashMap<RelayId, RelayId>,
}

impl ExchangeTable {
    pub fn len(&self) -> usize {
        self.by_inner.len()
    }

    /// Whether `id` is in use as either an inner or an outer id
    pub fn is_taken(&self, id: RelayId) -> bool {
        id == PLAIN_RELAY_ID || self.by_inner.contains_key(&id) || self.outer_to_inner.contains_key(&id)
    }

    /// Draw two distinct ids unused by any live exchange
    pub fn allocate_ids<R: Rng>(&self, rng: &mut R) -> Option<(RelayId, RelayId)> {
        for _ in 0..ID_ALLOCATION_ATTEMPTS {
            let inner: RelayId = rng.gen();
            let outer: RelayId = rng.gen();
            if inner != outer && !self.is_taken(inner) && !self.is_taken(outer) {
                return Some((inner, outer));
            }
        }
        None
    }

    pub fn insert(&mut self, exchange: RelayExchange) {
        self.outer_to_inner.insert(exchange.outer_id, exchange.inner_id);
        self.by_inner.insert(exchange.inner_id, exchange);
    }

    /// Resolve either id to the inner id
    fn resolve(&self, id: RelayId) -> Option<(RelayId, Direction)> {
        if self.by_inner.contains_key(&id) {
            Some((id, Direction::Outward))
        } else {
            self.outer_to_inner.get(&id).map(|inner| (*inner, Direction::Inward))
        }
    }

    pub fn get(&self, id: RelayId) -> Option<&RelayExchange> {
        let (inner, _) = self.resolve(id)?;
        self.by_inner.get(&inner)
    }

    pub fn get_mut(&mut self, id: RelayId) -> Option<&mut RelayExchange> {
        let (inner, _) = self.resolve(id)?;
        self.by_inner.get_mut(&inner)
    }

    pub fn remove(&mut self, id: RelayId) -> Option<RelayExchange> {
        let (inner, _) = self.resolve(id)?;
        let exchange = self.by_inner.remove(&inner)?;
        self.outer_to_inner.remove(&exchange.outer_id);
        Some(exchange)
    }

    /// Charge one point for a packet addressed to `id`.
    ///
    /// A budget of N lets exactly N packets through: an exchange sitting at
    /// zero points is still live, and only the packet that would take it
    /// below zero is refused and removes the exchange.
    pub fn charge(&mut self, id: RelayId, now: Instant) -> Charge {
        let Some((inner, direction)) = self.resolve(id) else {
            return Charge::Unknown;
        };
        let Some(exchange) = self.by_inner.get_mut(&inner) else {
            return Charge::Unknown;
        };

        exchange.points -= 1;
        if exchange.points < 0 {
            self.remove(inner);
            return Charge::Exhausted;
        }

        exchange.last_access = now;
        Charge::Pinned(exchange.view(), direction)
    }

    /// Remove exchanges idle past their retention, returning their inner ids
    pub fn sweep(&mut self, now: Instant) -> Vec<RelayId> {
        let expired: Vec<RelayId> = self
            .by_inner
            .values()
            .filter(|e| e.is_idle(now))
            .map(|e| e.inner_id)
            .collect();

        for id in &expired {
            self.remove(*id);
        }
        expired
    }
}
