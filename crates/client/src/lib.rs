//! HopCraft Client
//!
//! Client side of the relay circuit: grows a circuit one hop at a time over
//! authenticated hop connections and layers packets for it.

mod circuit;
mod key;
mod node;
mod transport;

pub use circuit::{CircuitConfig, CircuitKind, RelayCircuit};
pub use key::{DecryptedPacket, RelayKey};
pub use node::RelayNode;
pub use transport::{RelayConnection, RelayTransport};

use std::net::SocketAddr;

use hopcraft_crypto::CryptoError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Relay {0} is already part of the circuit")]
    DuplicateRelay(SocketAddr),

    #[error("Circuit hop limit reached ({limit})")]
    HopLimit { limit: usize },

    #[error("Relay number must not be zero")]
    InvalidRelayNumber,

    #[error("Not enough hops: requested {requested}, circuit has {available}")]
    NotEnoughHops { requested: usize, available: usize },

    #[error("Packet of {size} bytes exceeds the {limit} byte limit")]
    PacketTooLarge { size: usize, limit: usize },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Relay rejected request: {0}")]
    Rejected(String),

    #[error("Unexpected control response")]
    UnexpectedResponse,

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
