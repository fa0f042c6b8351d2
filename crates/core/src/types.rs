use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Per-circuit, per-node routing token that replaces a real address on the wire
pub type RelayId = u16;

/// Relay id carried by packets that are not routed through a relay
pub const PLAIN_RELAY_ID: RelayId = 0;

/// First payload byte of a transport connection-initiation packet
pub const CONNECT_PACKET_TYPE: u8 = 0x01;

/// Whether a payload is a connection-initiation packet of the transport
pub fn is_connect_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&CONNECT_PACKET_TYPE)
}

const ADDRESS_KIND_LOCAL: u8 = 0;
const ADDRESS_KIND_V4: u8 = 4;
const ADDRESS_KIND_V6: u8 = 6;

/// Destination carried inside an encrypted relay header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetAddress {
    /// Deliver to the relay that peels the terminal layer
    Local,
    /// Forward to a concrete transport address
    Socket(SocketAddr),
}

impl NetAddress {
    /// Fixed encoded size: kind (1) + address (16) + port (2)
    pub const ENCODED_LEN: usize = 19;

    pub fn is_local(&self) -> bool {
        matches!(self, NetAddress::Local)
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            NetAddress::Local => None,
            NetAddress::Socket(addr) => Some(*addr),
        }
    }

    /// Encode into the fixed 19-byte layout (port big-endian)
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        let addr = match self {
            NetAddress::Local => return out,
            NetAddress::Socket(addr) => addr,
        };

        match addr.ip() {
            IpAddr::V4(ip) => {
                out[0] = ADDRESS_KIND_V4;
                out[1..5].copy_from_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                out[0] = ADDRESS_KIND_V6;
                out[1..17].copy_from_slice(&ip.octets());
            }
        }
        out[17..19].copy_from_slice(&addr.port().to_be_bytes());
        out
    }

    /// Decode from the fixed layout. Returns `None` for short input or an unknown kind.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return None;
        }

        let port = u16::from_be_bytes([bytes[17], bytes[18]]);
        match bytes[0] {
            ADDRESS_KIND_LOCAL => Some(NetAddress::Local),
            ADDRESS_KIND_V4 => {
                let ip = Ipv4Addr::new(bytes[1], bytes[2], bytes[3], bytes[4]);
                Some(NetAddress::Socket(SocketAddr::new(IpAddr::V4(ip), port)))
            }
            ADDRESS_KIND_V6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&bytes[1..17]);
                let ip = Ipv6Addr::from(octets);
                Some(NetAddress::Socket(SocketAddr::new(IpAddr::V6(ip), port)))
            }
            _ => None,
        }
    }
}

impl From<SocketAddr> for NetAddress {
    fn from(addr: SocketAddr) -> Self {
        NetAddress::Socket(addr)
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetAddress::Local => write!(f, "local"),
            NetAddress::Socket(addr) => write!(f, "{}", addr),
        }
    }
}

/// A transport address paired with the relay id used to reach it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetEndpoint {
    pub relay_id: RelayId,
    pub address: SocketAddr,
}

impl NetEndpoint {
    pub fn new(relay_id: RelayId, address: SocketAddr) -> Self {
        Self { relay_id, address }
    }

    /// Endpoint without relay routing
    pub fn plain(address: SocketAddr) -> Self {
        Self {
            relay_id: PLAIN_RELAY_ID,
            address,
        }
    }

    pub fn is_plain(&self) -> bool {
        self.relay_id == PLAIN_RELAY_ID
    }
}

impl fmt::Display for NetEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.relay_id)
    }
}

/// Symmetric material produced once per authenticated connection.
///
/// Both ends of a hop hold a copy: the client in its `RelayNode`, the relay in
/// its `RelayExchange`. It is never mutated after the handshake.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EmbryoKey {
    pub key: [u8; 32],
    pub salt: u64,
    pub secret: u64,
}

impl EmbryoKey {
    pub fn new(key: [u8; 32], salt: u64, secret: u64) -> Self {
        Self { key, salt, secret }
    }
}

impl fmt::Debug for EmbryoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbryoKey")
            .field("key", &"<redacted>")
            .field("salt", &self.salt)
            .field("secret", &"<redacted>")
            .finish()
    }
}

bitflags! {
    /// Options requested by the client when a relay exchange is created
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ExchangeFlags: u8 {
        /// Outermost hop may pass return traffic from senders it has not seen
        const ALLOW_UNKNOWN_INBOUND = 0b0000_0001;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_address_v4_layout() {
        let addr: SocketAddr = "10.1.2.3:4000".parse().unwrap();
        let encoded = NetAddress::from(addr).encode();

        assert_eq!(encoded[0], ADDRESS_KIND_V4);
        assert_eq!(&encoded[1..5], &[10, 1, 2, 3]);
        assert_eq!(&encoded[17..19], &4000u16.to_be_bytes());
        assert_eq!(NetAddress::decode(&encoded), Some(NetAddress::Socket(addr)));
    }

    #[test]
    fn test_net_address_v6() {
        let addr: SocketAddr = "[2001:db8::7]:443".parse().unwrap();
        let encoded = NetAddress::Socket(addr).encode();
        assert_eq!(encoded[0], ADDRESS_KIND_V6);
        assert_eq!(NetAddress::decode(&encoded), Some(NetAddress::Socket(addr)));
    }

    #[test]
    fn test_net_address_local_is_zeroed() {
        let encoded = NetAddress::Local.encode();
        assert_eq!(encoded, [0u8; NetAddress::ENCODED_LEN]);
        assert!(NetAddress::decode(&encoded).unwrap().is_local());
    }

    #[test]
    fn test_net_address_rejects_unknown_kind() {
        let mut encoded = [0u8; NetAddress::ENCODED_LEN];
        encoded[0] = 9;
        assert_eq!(NetAddress::decode(&encoded), None);
    }

    #[test]
    fn test_net_address_rejects_short_input() {
        assert_eq!(NetAddress::decode(&[4, 1, 2]), None);
    }

    #[test]
    fn test_endpoint_plain() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let endpoint = NetEndpoint::plain(addr);
        assert!(endpoint.is_plain());
        assert!(!NetEndpoint::new(7, addr).is_plain());
        assert_eq!(NetEndpoint::new(7, addr).to_string(), "127.0.0.1:9000#7");
    }

    #[test]
    fn test_connect_packet_detection() {
        assert!(is_connect_packet(&[CONNECT_PACKET_TYPE, 0xAA]));
        assert!(!is_connect_packet(b"ping"));
        assert!(!is_connect_packet(&[]));
    }

    #[test]
    fn test_embryo_debug_redacts_key() {
        let embryo = EmbryoKey::new([0xAB; 32], 5, 6);
        let debug = format!("{:?}", embryo);
        assert!(debug.contains("redacted"));
        assert!(!debug.contains("171"));
    }

    #[test]
    fn test_exchange_flags_serde() {
        let flags = ExchangeFlags::ALLOW_UNKNOWN_INBOUND;
        let json = serde_json::to_string(&flags).unwrap();
        let parsed: ExchangeFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, flags);
    }
}
