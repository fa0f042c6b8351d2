//! Circuit key snapshot
//!
//! An immutable copy of every hop's endpoint and embryo material, in circuit
//! order. The circuit swaps in a fresh snapshot whenever its hop list
//! changes, so a sender holding one never sees a half-built hop list.

use rand::{Rng, RngCore};

use hopcraft_core::{EmbryoKey, NetAddress, NetEndpoint, RelayId};
use hopcraft_crypto::{
    body_verification, compose_packet, peel_body, split_packet, wrap_body, RelayHeader,
    RoutingPrefix, MAX_PACKET_LEN, PER_HOP_HEADER_LEN, TAG_LEN,
};

use crate::node::RelayNode;
use crate::{ClientError, Result};

#[derive(Debug, Clone, Copy)]
struct HopKey {
    endpoint: NetEndpoint,
    embryo: EmbryoKey,
}

/// Result of decrypting a packet that came back through the circuit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedPacket {
    /// Sender named by the terminal layer, or `NetAddress::Local` for the relay itself
    pub destination: NetAddress,
    /// 1-based index of the hop that added the terminal layer
    pub hop: usize,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RelayKey {
    local_id: RelayId,
    hops: Vec<HopKey>,
    max_padding: u8,
}

impl RelayKey {
    pub fn empty(local_id: RelayId) -> Self {
        Self::new(local_id, Vec::new(), 0)
    }

    /// Snapshot over explicit hop material, first hop first
    pub fn new(local_id: RelayId, hops: Vec<(NetEndpoint, EmbryoKey)>, max_padding: u8) -> Self {
        Self {
            local_id,
            hops: hops
                .into_iter()
                .map(|(endpoint, embryo)| HopKey { endpoint, embryo })
                .collect(),
            max_padding,
        }
    }

    pub(crate) fn from_nodes(local_id: RelayId, nodes: &[RelayNode], max_padding: u8) -> Self {
        Self::new(
            local_id,
            nodes.iter().map(|n| (n.endpoint(), n.embryo)).collect(),
            max_padding,
        )
    }

    pub fn local_id(&self) -> RelayId {
        self.local_id
    }

    pub fn number_of_hops(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn hops(&self) -> Vec<NetEndpoint> {
        self.hops.iter().map(|h| h.endpoint).collect()
    }

    pub fn first_hop(&self) -> Option<NetEndpoint> {
        self.hops.first().map(|h| h.endpoint)
    }

    /// Layer `payload` for the circuit.
    ///
    /// `relay_number` selects the terminal hop: `N` and `-N` both make hop `N`
    /// the one that peels the last layer. Returns the wire packet and the
    /// endpoint to send it to.
    pub fn encrypt(
        &self,
        relay_number: i32,
        destination: NetAddress,
        payload: &[u8],
    ) -> Result<(Vec<u8>, NetEndpoint)> {
        if relay_number == 0 {
            return Err(ClientError::InvalidRelayNumber);
        }
        let target = relay_number.unsigned_abs() as usize;
        if target > self.hops.len() {
            return Err(ClientError::NotEnoughHops {
                requested: target,
                available: self.hops.len(),
            });
        }

        let padding = self.random_padding();
        let size = PER_HOP_HEADER_LEN + target * TAG_LEN + payload.len() + padding.len();
        if size > MAX_PACKET_LEN {
            return Err(ClientError::PacketTooLarge {
                size,
                limit: MAX_PACKET_LEN,
            });
        }

        let mut body = RelayHeader::random(destination).build_body(payload, &padding)?;
        for hop in self.hops[..target].iter().rev() {
            body = wrap_body(&hop.embryo, &body)?;
        }

        let first = self.hops[0].endpoint;
        let packet = compose_packet(RoutingPrefix::new(self.local_id, first.relay_id), &body);
        Ok((packet, first))
    }

    /// Peel a packet received from `from`, hop by hop.
    ///
    /// Accepts replies addressed to the local id as well as packets this key
    /// layered itself, which carry the first hop's id. Returns `None` when the
    /// packet is not for this circuit: wrong sender, foreign relay id or no
    /// layer that opens to a verified header.
    pub fn decrypt(&self, from: &NetEndpoint, packet: &[u8]) -> Option<DecryptedPacket> {
        let first = self.first_hop()?;
        if first != *from {
            return None;
        }
        let (prefix, body) = split_packet(packet).ok()?;
        if prefix.destination != self.local_id && prefix.destination != first.relay_id {
            return None;
        }

        let mut body = body.to_vec();
        for (index, hop) in self.hops.iter().enumerate() {
            body = peel_body(&hop.embryo, &body).ok()?;
            if body_verification(&body).ok()? == 0 {
                let (header, payload) = RelayHeader::parse_body(&body).ok()?;
                return Some(DecryptedPacket {
                    destination: header.destination,
                    hop: index + 1,
                    payload: payload.to_vec(),
                });
            }
        }
        None
    }

    fn random_padding(&self) -> Vec<u8> {
        if self.max_padding == 0 {
            return Vec::new();
        }
        let mut rng = rand::thread_rng();
        let mut padding = vec![0u8; rng.gen_range(0..=self.max_padding as usize)];
        rng.fill_bytes(&mut padding);
        padding
    }
}
