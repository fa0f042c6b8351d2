//! Relay wire layout
//!
//! A relay packet is `[routing prefix][salt][layers...]`:
//!
//! ```text
//! [source relay id: u16 BE][destination relay id: u16 BE]   routing prefix, plaintext
//! [salt: u32 BE]                                            plaintext, nonce input
//! [verification: u32][padding len: u8][destination: 19]     sealed once per hop
//! [payload][padding][tag per hop]
//! ```
//!
//! The prefix and relay header together make up the fixed 32-byte per-hop header.

use rand::rngs::OsRng;
use rand::RngCore;

use hopcraft_core::{NetAddress, RelayId};

use crate::{CryptoError, Result};

/// Routing prefix length (two relay ids)
pub const ROUTING_PREFIX_LEN: usize = 4;

/// Plaintext salt at the start of every relay body
pub const SALT_LEN: usize = 4;

/// Encoded relay header: salt + verification + padding length + destination
pub const RELAY_HEADER_LEN: usize = SALT_LEN + 4 + 1 + NetAddress::ENCODED_LEN;

/// Fixed per-hop header size on the wire
pub const PER_HOP_HEADER_LEN: usize = ROUTING_PREFIX_LEN + RELAY_HEADER_LEN;

/// Poly1305 tag added by each layer
pub const TAG_LEN: usize = 16;

/// Largest relay packet that fits one UDP datagram
pub const MAX_PACKET_LEN: usize = 65_507;

/// Source and destination relay ids in front of every relay packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingPrefix {
    pub source: RelayId,
    pub destination: RelayId,
}

impl RoutingPrefix {
    pub fn new(source: RelayId, destination: RelayId) -> Self {
        Self { source, destination }
    }

    pub fn encode(&self) -> [u8; ROUTING_PREFIX_LEN] {
        let mut out = [0u8; ROUTING_PREFIX_LEN];
        out[0..2].copy_from_slice(&self.source.to_be_bytes());
        out[2..4].copy_from_slice(&self.destination.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, ROUTING_PREFIX_LEN)?;
        Ok(Self {
            source: u16::from_be_bytes([bytes[0], bytes[1]]),
            destination: u16::from_be_bytes([bytes[2], bytes[3]]),
        })
    }
}

/// Split a wire packet into its routing prefix and body
pub fn split_packet(packet: &[u8]) -> Result<(RoutingPrefix, &[u8])> {
    let prefix = RoutingPrefix::decode(packet)?;
    Ok((prefix, &packet[ROUTING_PREFIX_LEN..]))
}

/// Prepend a routing prefix to a body
pub fn compose_packet(prefix: RoutingPrefix, body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(ROUTING_PREFIX_LEN + body.len());
    packet.extend_from_slice(&prefix.encode());
    packet.extend_from_slice(body);
    packet
}

/// Header of the terminal layer.
///
/// `verification` is zero for a correctly peeled terminal layer. On any
/// intermediate layer the same bytes are still ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayHeader {
    pub salt: u32,
    pub verification: u32,
    pub padding_len: u8,
    pub destination: NetAddress,
}

impl RelayHeader {
    pub fn new(salt: u32, destination: NetAddress) -> Self {
        Self {
            salt,
            verification: 0,
            padding_len: 0,
            destination,
        }
    }

    /// Header with a fresh random salt
    pub fn random(destination: NetAddress) -> Self {
        Self::new(OsRng.next_u32(), destination)
    }

    pub fn is_verified(&self) -> bool {
        self.verification == 0
    }

    pub fn encode(&self) -> [u8; RELAY_HEADER_LEN] {
        let mut out = [0u8; RELAY_HEADER_LEN];
        out[0..4].copy_from_slice(&self.salt.to_be_bytes());
        out[4..8].copy_from_slice(&self.verification.to_be_bytes());
        out[8] = self.padding_len;
        out[9..].copy_from_slice(&self.destination.encode());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, RELAY_HEADER_LEN)?;
        let salt = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let verification = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let destination =
            NetAddress::decode(&bytes[9..RELAY_HEADER_LEN]).ok_or(CryptoError::InvalidAddress)?;

        Ok(Self {
            salt,
            verification,
            padding_len: bytes[8],
            destination,
        })
    }

    /// Build a plaintext body: header, payload, then `padding` filler bytes.
    ///
    /// The header's padding length is overwritten with `padding.len()`.
    pub fn build_body(mut self, payload: &[u8], padding: &[u8]) -> Result<Vec<u8>> {
        self.padding_len = u8::try_from(padding.len()).map_err(|_| CryptoError::InvalidPadding {
            padding: padding.len(),
            available: u8::MAX as usize,
        })?;

        let mut body = Vec::with_capacity(RELAY_HEADER_LEN + payload.len() + padding.len());
        body.extend_from_slice(&self.encode());
        body.extend_from_slice(payload);
        body.extend_from_slice(padding);
        Ok(body)
    }

    /// Parse a fully peeled body into its header and payload, stripping padding
    pub fn parse_body(body: &[u8]) -> Result<(Self, &[u8])> {
        let header = Self::decode(body)?;
        let rest = &body[RELAY_HEADER_LEN..];
        let padding = header.padding_len as usize;
        if padding > rest.len() {
            return Err(CryptoError::InvalidPadding {
                padding,
                available: rest.len(),
            });
        }
        Ok((header, &rest[..rest.len() - padding]))
    }
}

/// Read the plaintext salt of a relay body
pub fn body_salt(body: &[u8]) -> Result<u32> {
    ensure_len(body, SALT_LEN)?;
    Ok(u32::from_be_bytes([body[0], body[1], body[2], body[3]]))
}

/// Read the verification field of a relay body without decoding the rest
pub fn body_verification(body: &[u8]) -> Result<u32> {
    ensure_len(body, SALT_LEN + 4)?;
    Ok(u32::from_be_bytes([body[4], body[5], body[6], body[7]]))
}

fn ensure_len(bytes: &[u8], needed: usize) -> Result<()> {
    if bytes.len() < needed {
        return Err(CryptoError::Truncated {
            needed,
            got: bytes.len(),
        });
    }
    Ok(())
}
