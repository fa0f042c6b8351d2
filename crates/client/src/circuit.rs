//! Client-side relay circuit
//!
//! A circuit is grown one hop at a time. Each new hop gets a relay exchange
//! created over its own authenticated connection, then the previous hop is
//! told where its outer side now leads. Teardown runs outermost-first.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use hopcraft_core::{
    ControlMessage, ControlResponse, CreateRelayRequest, ExchangeFlags, NetAddress, NetEndpoint,
    RelayId,
};

use crate::key::{DecryptedPacket, RelayKey};
use crate::node::RelayNode;
use crate::transport::RelayTransport;
use crate::{ClientError, Result};

/// Which side built the circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitKind {
    /// Built by this node to reach a destination
    Outgoing,
    /// Built on behalf of a peer that uses this node as its first hop
    Incoming,
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    pub max_outgoing_hops: usize,
    pub max_incoming_hops: usize,
    /// Pause between closing consecutive hops so queued packets can drain
    pub close_delay: Duration,
    /// Upper bound of random padding added to each outgoing packet
    pub max_padding: u8,
    /// Ask the outermost hop to accept replies from endpoints it has not seen
    pub allow_unknown_inbound: bool,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            max_outgoing_hops: 5,
            max_incoming_hops: 2,
            close_delay: Duration::from_millis(50),
            max_padding: 0,
            allow_unknown_inbound: false,
        }
    }
}

pub struct RelayCircuit {
    kind: CircuitKind,
    config: CircuitConfig,
    local_id: RelayId,
    transport: Arc<dyn RelayTransport>,
    /// Held across control round trips so that growth and teardown are serial
    nodes: Mutex<Vec<RelayNode>>,
    key: RwLock<Arc<RelayKey>>,
}

impl RelayCircuit {
    pub fn new(kind: CircuitKind, config: CircuitConfig, transport: Arc<dyn RelayTransport>) -> Self {
        let local_id = rand::thread_rng().gen_range(1..=RelayId::MAX);
        Self {
            kind,
            config,
            local_id,
            transport,
            nodes: Mutex::new(Vec::new()),
            key: RwLock::new(Arc::new(RelayKey::empty(local_id))),
        }
    }

    pub fn kind(&self) -> CircuitKind {
        self.kind
    }

    /// Relay id the first hop addresses return traffic to
    pub fn local_relay_id(&self) -> RelayId {
        self.local_id
    }

    pub fn hop_limit(&self) -> usize {
        match self.kind {
            CircuitKind::Outgoing => self.config.max_outgoing_hops,
            CircuitKind::Incoming => self.config.max_incoming_hops,
        }
    }

    /// Current key snapshot
    pub fn key(&self) -> Arc<RelayKey> {
        Arc::clone(&self.key.read())
    }

    pub fn number_of_hops(&self) -> usize {
        self.key.read().number_of_hops()
    }

    pub fn hops(&self) -> Vec<NetEndpoint> {
        self.key.read().hops()
    }

    /// Extend the circuit by the relay at `address`. Returns the new hop's endpoint.
    ///
    /// A failure leaves the existing hops untouched.
    pub async fn add_relay(&self, address: SocketAddr) -> Result<NetEndpoint> {
        let mut nodes = self.nodes.lock().await;

        if nodes.iter().any(|n| n.address == address) {
            return Err(ClientError::DuplicateRelay(address));
        }
        let limit = self.hop_limit();
        if nodes.len() >= limit {
            return Err(ClientError::HopLimit { limit });
        }

        let connection = self.transport.connect(address).await?;
        let previous = nodes.last().cloned();

        let mut flags = ExchangeFlags::empty();
        if self.config.allow_unknown_inbound {
            flags |= ExchangeFlags::ALLOW_UNKNOWN_INBOUND;
        }
        let request = CreateRelayRequest {
            inner_address: previous.as_ref().map(|p| p.address),
            inner_relay_id: previous.as_ref().map(|p| p.outer_id).unwrap_or(self.local_id),
            flags,
            retention_secs: None,
        };

        let (inner_id, outer_id) = match connection
            .send_control(ControlMessage::CreateRelay(request))
            .await?
        {
            ControlResponse::Created { inner_id, outer_id } => (inner_id, outer_id),
            ControlResponse::Rejected(reason) => return Err(ClientError::Rejected(reason)),
            ControlResponse::Accepted => return Err(ClientError::UnexpectedResponse),
        };
        let node = RelayNode::new(connection, inner_id, outer_id);

        if let Some(previous) = previous {
            let link = ControlMessage::SetOuterEndpoint {
                relay_id: previous.inner_id,
                endpoint: node.endpoint(),
            };
            let linked = match previous.connection().send_control(link).await {
                Ok(ControlResponse::Accepted) => Ok(()),
                Ok(ControlResponse::Rejected(reason)) => Err(ClientError::Rejected(reason)),
                Ok(_) => Err(ClientError::UnexpectedResponse),
                Err(e) => Err(e),
            };

            if let Err(e) = linked {
                warn!(relay = %address, error = %e, "Could not link new hop, aborting it");
                let close = ControlMessage::CloseRelay { relay_id: inner_id };
                if let Err(close_err) = node.connection().send_control(close).await {
                    debug!(relay = %address, error = %close_err, "Abort of new hop failed");
                }
                return Err(e);
            }
        }

        let endpoint = node.endpoint();
        nodes.push(node);
        self.rebuild_key(&nodes);

        info!(relay = %endpoint, hops = nodes.len(), "Extended circuit");
        Ok(endpoint)
    }

    /// Tear the circuit down, outermost hop first.
    ///
    /// Close failures are logged and skipped; local state is always cleared.
    pub async fn close(&self) {
        let mut nodes = self.nodes.lock().await;
        let count = nodes.len();

        for (index, node) in nodes.iter().enumerate().rev() {
            let close = ControlMessage::CloseRelay {
                relay_id: node.inner_id,
            };
            match node.connection().send_control(close).await {
                Ok(ControlResponse::Accepted) => {}
                Ok(response) => {
                    debug!(relay = %node.endpoint(), ?response, "Relay refused close")
                }
                Err(e) => debug!(relay = %node.endpoint(), error = %e, "Close failed"),
            }

            if index > 0 && !self.config.close_delay.is_zero() {
                tokio::time::sleep(self.config.close_delay).await;
            }
        }

        nodes.clear();
        self.rebuild_key(&nodes);
        if count > 0 {
            info!(hops = count, "Closed circuit");
        }
    }

    /// Drop hops whose connection has closed.
    ///
    /// Everything behind the first dead hop is unreachable, so the circuit is
    /// cut there and the new last hop is told to forget its outer neighbour.
    /// That keeps it usable as an exit and lets the circuit be extended again.
    /// Returns the number of hops removed.
    pub async fn clean(&self) -> usize {
        let mut nodes = self.nodes.lock().await;
        let Some(first_dead) = nodes.iter().position(|n| n.is_closed()) else {
            return 0;
        };

        let removed = nodes.len() - first_dead;
        nodes.truncate(first_dead);
        self.rebuild_key(&nodes);

        if let Some(last) = nodes.last() {
            let clear = ControlMessage::ClearOuterEndpoint {
                relay_id: last.inner_id,
            };
            match last.connection().send_control(clear).await {
                Ok(ControlResponse::Accepted) => {}
                Ok(response) => {
                    warn!(relay = %last.endpoint(), ?response, "Relay refused to unlink dead hop")
                }
                Err(e) => warn!(relay = %last.endpoint(), error = %e, "Could not unlink dead hop"),
            }
        }

        info!(removed, hops = nodes.len(), "Cut circuit at closed hop");
        removed
    }

    pub fn encrypt(
        &self,
        relay_number: i32,
        destination: NetAddress,
        payload: &[u8],
    ) -> Result<(Vec<u8>, NetEndpoint)> {
        self.key().encrypt(relay_number, destination, payload)
    }

    pub fn decrypt(&self, from: &NetEndpoint, packet: &[u8]) -> Option<DecryptedPacket> {
        self.key().decrypt(from, packet)
    }

    fn rebuild_key(&self, nodes: &[RelayNode]) {
        let key = RelayKey::from_nodes(self.local_id, nodes, self.config.max_padding);
        *self.key.write() = Arc::new(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RelayConnection;
    use async_trait::async_trait;
    use hopcraft_core::EmbryoKey;
    use hopcraft_crypto::random_embryo;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

    /// Relay double that answers every control message and records it
    struct FakeConnection {
        remote: SocketAddr,
        embryo: EmbryoKey,
        closed: AtomicBool,
        next_id: AtomicU16,
        reject_link: bool,
        log: Arc<parking_lot::Mutex<Vec<(SocketAddr, ControlMessage)>>>,
    }

    #[async_trait]
    impl RelayConnection for FakeConnection {
        fn remote(&self) -> SocketAddr {
            self.remote
        }

        fn embryo(&self) -> EmbryoKey {
            self.embryo
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        async fn send_control(&self, message: ControlMessage) -> Result<ControlResponse> {
            self.log.lock().push((self.remote, message.clone()));
            if self.is_closed() {
                return Err(ClientError::Transport("connection closed".to_string()));
            }
            Ok(match message {
                ControlMessage::CreateRelay(_) => {
                    let inner_id = self.next_id.fetch_add(2, Ordering::SeqCst);
                    ControlResponse::Created {
                        inner_id,
                        outer_id: inner_id + 1,
                    }
                }
                ControlMessage::SetOuterEndpoint { .. } if self.reject_link => {
                    ControlResponse::Rejected("no".to_string())
                }
                _ => ControlResponse::Accepted,
            })
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        connections: parking_lot::Mutex<HashMap<SocketAddr, Arc<FakeConnection>>>,
        log: Arc<parking_lot::Mutex<Vec<(SocketAddr, ControlMessage)>>>,
        reject_link_at: Option<SocketAddr>,
    }

    impl FakeTransport {
        fn connection(&self, address: SocketAddr) -> Arc<FakeConnection> {
            Arc::clone(&self.connections.lock()[&address])
        }

        fn messages(&self) -> Vec<(SocketAddr, ControlMessage)> {
            self.log.lock().clone()
        }
    }

    #[async_trait]
    impl RelayTransport for FakeTransport {
        async fn connect(&self, address: SocketAddr) -> Result<Arc<dyn RelayConnection>> {
            let mut connections = self.connections.lock();
            let connection = connections.entry(address).or_insert_with(|| {
                Arc::new(FakeConnection {
                    remote: address,
                    embryo: random_embryo(),
                    closed: AtomicBool::new(false),
                    next_id: AtomicU16::new(10 * address.port()),
                    reject_link: self.reject_link_at == Some(address),
                    log: Arc::clone(&self.log),
                })
            });
            Ok(Arc::clone(connection) as Arc<dyn RelayConnection>)
        }
    }

    fn relay(n: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, n as u8], n))
    }

    fn circuit(kind: CircuitKind, transport: Arc<FakeTransport>) -> RelayCircuit {
        let config = CircuitConfig {
            close_delay: Duration::ZERO,
            ..CircuitConfig::default()
        };
        RelayCircuit::new(kind, config, transport)
    }

    #[tokio::test]
    async fn test_add_relay_links_hops() {
        let transport = Arc::new(FakeTransport::default());
        let circuit = circuit(CircuitKind::Outgoing, Arc::clone(&transport));

        let first = circuit.add_relay(relay(1)).await.unwrap();
        let second = circuit.add_relay(relay(2)).await.unwrap();
        assert_eq!(circuit.number_of_hops(), 2);
        assert_eq!(circuit.hops(), vec![first, second]);

        let messages = transport.messages();
        assert_eq!(messages.len(), 3);

        match &messages[0] {
            (addr, ControlMessage::CreateRelay(req)) => {
                assert_eq!(*addr, relay(1));
                assert_eq!(req.inner_address, None);
                assert_eq!(req.inner_relay_id, circuit.local_relay_id());
            }
            other => panic!("unexpected {:?}", other),
        }
        match &messages[1] {
            (addr, ControlMessage::CreateRelay(req)) => {
                assert_eq!(*addr, relay(2));
                assert_eq!(req.inner_address, Some(relay(1)));
                // Outer id of the first hop
                assert_eq!(req.inner_relay_id, first.relay_id + 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            messages[2],
            (
                relay(1),
                ControlMessage::SetOuterEndpoint {
                    relay_id: first.relay_id,
                    endpoint: second,
                }
            )
        );
    }

    #[tokio::test]
    async fn test_duplicate_relay_rejected() {
        let transport = Arc::new(FakeTransport::default());
        let circuit = circuit(CircuitKind::Outgoing, transport);

        circuit.add_relay(relay(1)).await.unwrap();
        assert!(matches!(
            circuit.add_relay(relay(1)).await,
            Err(ClientError::DuplicateRelay(_))
        ));
        assert_eq!(circuit.number_of_hops(), 1);
    }

    #[tokio::test]
    async fn test_hop_limits_by_kind() {
        let transport = Arc::new(FakeTransport::default());
        let incoming = circuit(CircuitKind::Incoming, Arc::clone(&transport));
        incoming.add_relay(relay(1)).await.unwrap();
        incoming.add_relay(relay(2)).await.unwrap();
        assert!(matches!(
            incoming.add_relay(relay(3)).await,
            Err(ClientError::HopLimit { limit: 2 })
        ));

        let outgoing = circuit(CircuitKind::Outgoing, transport);
        for n in 1..=5 {
            outgoing.add_relay(relay(n)).await.unwrap();
        }
        assert!(matches!(
            outgoing.add_relay(relay(6)).await,
            Err(ClientError::HopLimit { limit: 5 })
        ));
    }

    #[tokio::test]
    async fn test_failed_link_aborts_only_new_hop() {
        let transport = Arc::new(FakeTransport {
            reject_link_at: Some(relay(1)),
            ..FakeTransport::default()
        });
        let circuit = circuit(CircuitKind::Outgoing, Arc::clone(&transport));

        circuit.add_relay(relay(1)).await.unwrap();
        assert!(matches!(
            circuit.add_relay(relay(2)).await,
            Err(ClientError::Rejected(_))
        ));
        assert_eq!(circuit.number_of_hops(), 1);

        let last = transport.messages().pop().unwrap();
        assert_eq!(last.0, relay(2));
        assert!(matches!(last.1, ControlMessage::CloseRelay { .. }));
    }

    #[tokio::test]
    async fn test_close_runs_outermost_first() {
        let transport = Arc::new(FakeTransport::default());
        let circuit = circuit(CircuitKind::Outgoing, Arc::clone(&transport));
        for n in 1..=3 {
            circuit.add_relay(relay(n)).await.unwrap();
        }
        // A dead hop must not stop the teardown
        transport.connection(relay(2)).closed.store(true, Ordering::SeqCst);

        circuit.close().await;
        assert_eq!(circuit.number_of_hops(), 0);
        assert!(circuit.key().is_empty());

        let closes: Vec<SocketAddr> = transport
            .messages()
            .into_iter()
            .filter(|(_, m)| matches!(m, ControlMessage::CloseRelay { .. }))
            .map(|(addr, _)| addr)
            .collect();
        assert_eq!(closes, vec![relay(3), relay(2), relay(1)]);
    }

    #[tokio::test]
    async fn test_clean_cuts_at_closed_hop() {
        let transport = Arc::new(FakeTransport::default());
        let circuit = circuit(CircuitKind::Outgoing, Arc::clone(&transport));
        for n in 1..=4 {
            circuit.add_relay(relay(n)).await.unwrap();
        }
        assert_eq!(circuit.clean().await, 0);

        transport.connection(relay(2)).closed.store(true, Ordering::SeqCst);
        assert_eq!(circuit.clean().await, 3);
        assert_eq!(circuit.hops().len(), 1);
        assert_eq!(
            transport.messages().pop().unwrap(),
            (
                relay(1),
                ControlMessage::ClearOuterEndpoint {
                    relay_id: circuit.hops()[0].relay_id,
                }
            )
        );
        assert_eq!(circuit.clean().await, 0);

        circuit.add_relay(relay(5)).await.unwrap();
        assert_eq!(circuit.number_of_hops(), 2);
    }

    #[tokio::test]
    async fn test_clean_of_first_hop_empties_circuit() {
        let transport = Arc::new(FakeTransport::default());
        let circuit = circuit(CircuitKind::Outgoing, Arc::clone(&transport));
        circuit.add_relay(relay(1)).await.unwrap();
        circuit.add_relay(relay(2)).await.unwrap();

        transport.connection(relay(1)).closed.store(true, Ordering::SeqCst);
        let sent_before = transport.messages().len();
        assert_eq!(circuit.clean().await, 2);
        assert_eq!(circuit.number_of_hops(), 0);
        assert_eq!(transport.messages().len(), sent_before);
    }

    #[tokio::test]
    async fn test_key_snapshot_is_replaced() {
        let transport = Arc::new(FakeTransport::default());
        let circuit = circuit(CircuitKind::Outgoing, transport);

        circuit.add_relay(relay(1)).await.unwrap();
        let before = circuit.key();
        circuit.add_relay(relay(2)).await.unwrap();

        // Old snapshot is untouched
        assert_eq!(before.number_of_hops(), 1);
        assert_eq!(circuit.key().number_of_hops(), 2);
        assert!(circuit.encrypt(2, NetAddress::Local, b"x").is_ok());
        assert!(before.encrypt(2, NetAddress::Local, b"x").is_err());
    }
}
