//! Relay agent: the forwarding engine of a relay node
//!
//! `process_relay` is called by any number of transport workers at once. The
//! exchange table lock is held only to look up the exchange, charge its point
//! budget and copy out its key material; layer crypto runs unlocked.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use hopcraft_core::{
    is_connect_packet, ControlMessage, ControlResponse, CreateRelayRequest, EmbryoKey,
    ExchangeFlags, NetAddress, NetEndpoint, RelayId, PLAIN_RELAY_ID,
};
use hopcraft_crypto::{
    body_verification, compose_packet, peel_body, split_packet, wrap_body, RelayHeader,
    RoutingPrefix,
};

use crate::cache::EndpointCache;
use crate::config::AgentConfig;
use crate::exchange::{Charge, Direction, ExchangeInfo, ExchangeTable, ExchangeView, RelayExchange};
use crate::queue::{OutboundQueue, RawSender};
use crate::{RelayError, Result};

/// The authenticated connection a control message arrived on
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo {
    pub remote: SocketAddr,
    pub embryo: EmbryoKey,
}

/// A packet whose terminal layer named this relay as the destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPacket {
    /// Inner id of the exchange it arrived on; pass to `send_local` to answer
    pub relay_id: RelayId,
    pub source: NetEndpoint,
    pub payload: Vec<u8>,
}

/// Why a packet was discarded. Never reported to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnknownExchange,
    Exhausted,
    SourceMismatch,
    Malformed,
    DecryptFailed,
    NoOuterEndpoint,
    Restricted,
    RateLimited,
    QueueClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayVerdict {
    /// Queued for the next hop or the destination
    Forwarded,
    /// Addressed to this node
    Delivered(LocalPacket),
    Dropped(DropReason),
}

impl RelayVerdict {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, RelayVerdict::Dropped(_))
    }
}

pub struct RelayAgent {
    config: AgentConfig,
    exchanges: Mutex<ExchangeTable>,
    endpoints: Mutex<EndpointCache>,
    /// Last admission of an unknown sender, shared by all exchanges
    last_unknown_admit: Mutex<Option<Instant>>,
    outbound: OutboundQueue,
}

impl RelayAgent {
    pub fn new(config: AgentConfig) -> Self {
        let endpoints =
            EndpointCache::with_config(config.unrestricted_retention, config.endpoint_cache_capacity);
        Self {
            config,
            exchanges: Mutex::new(ExchangeTable::default()),
            endpoints: Mutex::new(endpoints),
            last_unknown_admit: Mutex::new(None),
            outbound: OutboundQueue::new(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Open an exchange for a hop requested over `connection`.
    ///
    /// The connection's embryo material is copied, so the exchange keeps
    /// working after the connection is gone.
    pub fn add_exchange(
        &self,
        connection: &ConnectionInfo,
        request: &CreateRelayRequest,
    ) -> Result<(RelayId, RelayId)> {
        let now = Instant::now();
        let retention = request
            .retention_secs
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(self.config.exchange_retention)
            .min(self.config.max_exchange_retention);
        let inner_endpoint = NetEndpoint::new(
            request.inner_relay_id,
            request.inner_address.unwrap_or(connection.remote),
        );

        let mut table = self.exchanges.lock();
        if table.len() >= self.config.max_exchanges {
            warn!(limit = self.config.max_exchanges, "Refusing exchange: limit reached");
            return Err(RelayError::ExchangeLimit {
                limit: self.config.max_exchanges,
            });
        }

        let (inner_id, outer_id) = table
            .allocate_ids(&mut rand::thread_rng())
            .ok_or(RelayError::IdSpaceExhausted)?;

        table.insert(RelayExchange {
            inner_id,
            outer_id,
            inner_endpoint,
            outer_endpoint: None,
            embryo: connection.embryo,
            flags: request.flags,
            points: self.config.exchange_points,
            retention,
            owner: connection.remote,
            created_at: now,
            last_access: now,
        });
        drop(table);

        info!(inner_id, outer_id, inner = %inner_endpoint, "Created relay exchange");
        Ok((inner_id, outer_id))
    }

    /// Record where outward traffic of exchange `relay_id` goes next
    pub fn set_outer_endpoint(
        &self,
        owner: SocketAddr,
        relay_id: RelayId,
        endpoint: NetEndpoint,
    ) -> Result<()> {
        let mut table = self.exchanges.lock();
        let exchange = table
            .get_mut(relay_id)
            .ok_or(RelayError::UnknownExchange(relay_id))?;

        if exchange.owner != owner {
            return Err(RelayError::NotOwner(relay_id));
        }
        if exchange.outer_endpoint.is_some() {
            return Err(RelayError::OuterEndpointAlreadySet(relay_id));
        }

        exchange.outer_endpoint = Some(endpoint);
        exchange.last_access = Instant::now();
        debug!(inner_id = exchange.inner_id, outer = %endpoint, "Set outer endpoint");
        Ok(())
    }

    /// Drop the outer endpoint of `relay_id` after its outer hop went away.
    ///
    /// Only the owner may do this; a set endpoint is otherwise fixed.
    pub fn clear_outer_endpoint(&self, owner: SocketAddr, relay_id: RelayId) -> Result<()> {
        let mut table = self.exchanges.lock();
        let exchange = table
            .get_mut(relay_id)
            .ok_or(RelayError::UnknownExchange(relay_id))?;

        if exchange.owner != owner {
            return Err(RelayError::NotOwner(relay_id));
        }

        if let Some(previous) = exchange.outer_endpoint.take() {
            debug!(inner_id = exchange.inner_id, outer = %previous, "Cleared outer endpoint");
        }
        exchange.last_access = Instant::now();
        Ok(())
    }

    pub fn close_exchange(&self, owner: SocketAddr, relay_id: RelayId) -> Result<()> {
        let mut table = self.exchanges.lock();
        let exchange = table.get(relay_id).ok_or(RelayError::UnknownExchange(relay_id))?;
        if exchange.owner != owner {
            return Err(RelayError::NotOwner(relay_id));
        }

        if let Some(removed) = table.remove(relay_id) {
            info!(inner_id = removed.inner_id, "Closed relay exchange");
        }
        Ok(())
    }

    /// Server side of the circuit control protocol
    pub fn handle_control(
        &self,
        connection: &ConnectionInfo,
        message: ControlMessage,
    ) -> ControlResponse {
        let result = match message {
            ControlMessage::CreateRelay(request) => self
                .add_exchange(connection, &request)
                .map(|(inner_id, outer_id)| ControlResponse::Created { inner_id, outer_id }),
            ControlMessage::SetOuterEndpoint { relay_id, endpoint } => self
                .set_outer_endpoint(connection.remote, relay_id, endpoint)
                .map(|_| ControlResponse::Accepted),
            ControlMessage::ClearOuterEndpoint { relay_id } => self
                .clear_outer_endpoint(connection.remote, relay_id)
                .map(|_| ControlResponse::Accepted),
            ControlMessage::CloseRelay { relay_id } => self
                .close_exchange(connection.remote, relay_id)
                .map(|_| ControlResponse::Accepted),
        };

        result.unwrap_or_else(|e| {
            debug!(remote = %connection.remote, error = %e, "Rejected control message");
            ControlResponse::Rejected(e.to_string())
        })
    }

    /// Handle a whole wire packet received from `source`
    pub fn process_packet(&self, source: SocketAddr, packet: &[u8]) -> RelayVerdict {
        let Ok((prefix, body)) = split_packet(packet) else {
            trace!(source = %source, "Dropping truncated packet");
            return RelayVerdict::Dropped(DropReason::Malformed);
        };
        if prefix.destination == PLAIN_RELAY_ID {
            return RelayVerdict::Dropped(DropReason::UnknownExchange);
        }
        self.process_relay(
            NetEndpoint::new(prefix.source, source),
            prefix.destination,
            body,
        )
    }

    /// Forward one relay body addressed to `destination` on this node
    pub fn process_relay(
        &self,
        source: NetEndpoint,
        destination: RelayId,
        body: &[u8],
    ) -> RelayVerdict {
        let now = Instant::now();
        let charge = self.exchanges.lock().charge(destination, now);

        let (view, direction) = match charge {
            Charge::Pinned(view, direction) => (view, direction),
            Charge::Unknown => {
                trace!(relay_id = destination, source = %source, "No exchange for packet");
                return RelayVerdict::Dropped(DropReason::UnknownExchange);
            }
            Charge::Exhausted => {
                info!(relay_id = destination, "Exchange exhausted its points, removed");
                return RelayVerdict::Dropped(DropReason::Exhausted);
            }
        };

        let verdict = match direction {
            Direction::Outward => self.relay_outward(&view, source, body, now),
            Direction::Inward => self.relay_inward(&view, source, body, now),
        };

        if let RelayVerdict::Dropped(reason) = &verdict {
            debug!(relay_id = destination, source = %source, ?reason, "Dropped relay packet");
        }
        verdict
    }

    fn relay_outward(
        &self,
        view: &ExchangeView,
        source: NetEndpoint,
        body: &[u8],
        now: Instant,
    ) -> RelayVerdict {
        if source != view.inner_endpoint {
            warn!(
                inner_id = view.inner_id,
                expected = %view.inner_endpoint,
                source = %source,
                "Inner endpoint mismatch, possible spoofing"
            );
            return RelayVerdict::Dropped(DropReason::SourceMismatch);
        }

        let Ok(peeled) = peel_body(&view.embryo, body) else {
            return RelayVerdict::Dropped(DropReason::DecryptFailed);
        };
        let Ok(verification) = body_verification(&peeled) else {
            return RelayVerdict::Dropped(DropReason::Malformed);
        };

        if verification != 0 {
            let Some(outer) = view.outer_endpoint else {
                return RelayVerdict::Dropped(DropReason::NoOuterEndpoint);
            };
            return self.enqueue(
                outer.address,
                RoutingPrefix::new(view.outer_id, outer.relay_id),
                &peeled,
            );
        }

        let Ok((header, payload)) = RelayHeader::parse_body(&peeled) else {
            return RelayVerdict::Dropped(DropReason::Malformed);
        };

        match header.destination {
            NetAddress::Local => RelayVerdict::Delivered(LocalPacket {
                relay_id: view.inner_id,
                source: view.inner_endpoint,
                payload: payload.to_vec(),
            }),
            NetAddress::Socket(destination) => {
                self.endpoints
                    .lock()
                    .observe(destination, is_connect_packet(payload), now);
                self.enqueue(
                    destination,
                    RoutingPrefix::new(view.outer_id, PLAIN_RELAY_ID),
                    payload,
                )
            }
        }
    }

    fn relay_inward(
        &self,
        view: &ExchangeView,
        source: NetEndpoint,
        body: &[u8],
        now: Instant,
    ) -> RelayVerdict {
        let wrapped = match view.outer_endpoint {
            Some(outer) => {
                if source != outer {
                    return RelayVerdict::Dropped(DropReason::SourceMismatch);
                }
                wrap_body(&view.embryo, body)
            }
            None => {
                // Outermost hop: the body is a plain reply from the destination
                if let Err(reason) = self.admit_from_destination(view, source.address, now) {
                    return RelayVerdict::Dropped(reason);
                }
                RelayHeader::random(NetAddress::Socket(source.address))
                    .build_body(body, &[])
                    .and_then(|plain| wrap_body(&view.embryo, &plain))
            }
        };

        match wrapped {
            Ok(wrapped) => self.enqueue(
                view.inner_endpoint.address,
                RoutingPrefix::new(view.inner_id, view.inner_endpoint.relay_id),
                &wrapped,
            ),
            Err(_) => RelayVerdict::Dropped(DropReason::Malformed),
        }
    }

    /// Admission for return traffic at the outermost hop
    fn admit_from_destination(
        &self,
        view: &ExchangeView,
        address: SocketAddr,
        now: Instant,
    ) -> std::result::Result<(), DropReason> {
        if self.endpoints.lock().is_unrestricted(&address, now) {
            return Ok(());
        }
        if !self.config.allow_unknown_inbound
            && !view.flags.contains(ExchangeFlags::ALLOW_UNKNOWN_INBOUND)
        {
            return Err(DropReason::Restricted);
        }

        let mut last = self.last_unknown_admit.lock();
        match *last {
            Some(at) if now.saturating_duration_since(at) < self.config.unknown_sender_interval => {
                Err(DropReason::RateLimited)
            }
            _ => {
                *last = Some(now);
                Ok(())
            }
        }
    }

    /// Answer down a circuit from this node.
    ///
    /// The client sees the "deliver locally" address and this hop's index.
    pub fn send_local(&self, relay_id: RelayId, payload: &[u8]) -> Result<()> {
        let view = {
            let mut table = self.exchanges.lock();
            let exchange = table
                .get_mut(relay_id)
                .ok_or(RelayError::UnknownExchange(relay_id))?;
            exchange.last_access = Instant::now();
            exchange.view()
        };

        let plain = RelayHeader::random(NetAddress::Local).build_body(payload, &[])?;
        let wrapped = wrap_body(&view.embryo, &plain)?;
        match self.enqueue(
            view.inner_endpoint.address,
            RoutingPrefix::new(view.inner_id, view.inner_endpoint.relay_id),
            &wrapped,
        ) {
            RelayVerdict::Forwarded => Ok(()),
            _ => Err(RelayError::QueueClosed),
        }
    }

    fn enqueue(&self, destination: SocketAddr, prefix: RoutingPrefix, body: &[u8]) -> RelayVerdict {
        if self.outbound.enqueue(destination, compose_packet(prefix, body)) {
            RelayVerdict::Forwarded
        } else {
            RelayVerdict::Dropped(DropReason::QueueClosed)
        }
    }

    /// Drain queued packets into `sender`; call once per network-send tick
    pub fn process_send(&self, sender: &dyn RawSender) -> usize {
        self.outbound.drain(sender, self.config.max_send_batch)
    }

    /// Remove idle exchanges and stale endpoint entries. Returns the number of exchanges removed.
    pub fn clean(&self) -> usize {
        self.clean_at(Instant::now())
    }

    pub fn clean_at(&self, now: Instant) -> usize {
        let expired = self.exchanges.lock().sweep(now);
        for inner_id in &expired {
            info!(inner_id, "Exchange expired");
        }

        let stale = self.endpoints.lock().sweep(now);
        if stale > 0 {
            trace!(stale, "Dropped stale endpoint entries");
        }
        expired.len()
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.lock().len()
    }

    /// Whether `relay_id` is the inner or outer id of a live exchange
    pub fn contains(&self, relay_id: RelayId) -> bool {
        self.exchanges.lock().get(relay_id).is_some()
    }

    pub fn exchange_info(&self, relay_id: RelayId) -> Option<ExchangeInfo> {
        self.exchanges.lock().get(relay_id).map(|e| ExchangeInfo {
            inner_id: e.inner_id,
            outer_id: e.outer_id,
            inner_endpoint: e.inner_endpoint,
            outer_endpoint: e.outer_endpoint,
            points: e.points,
        })
    }

    /// Packets waiting for the send pump
    pub fn pending_sends(&self) -> usize {
        self.outbound.len()
    }
}
