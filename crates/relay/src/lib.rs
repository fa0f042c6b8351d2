//! HopCraft Relay
//!
//! Server side of the relay circuit. A `RelayAgent` keeps one exchange per
//! circuit passing through this node, peels or adds exactly one encryption
//! layer per packet, and hands the result to a non-blocking outbound queue.
//! Every failure on the forwarding path is a silent drop.

mod agent;
mod cache;
mod config;
mod exchange;
mod maintenance;
mod queue;
mod udp;

pub use agent::{ConnectionInfo, DropReason, LocalPacket, RelayAgent, RelayVerdict};
pub use cache::EndpointCache;
pub use config::AgentConfig;
pub use exchange::{Direction, ExchangeInfo, RelayExchange};
pub use maintenance::spawn_maintenance;
pub use queue::{OutboundPacket, OutboundQueue, RawSender, SendStatus};
pub use udp::{serve_udp, UdpSender};

use hopcraft_core::RelayId;
use hopcraft_crypto::CryptoError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Exchange limit reached ({limit})")]
    ExchangeLimit { limit: usize },

    #[error("No free relay id pair")]
    IdSpaceExhausted,

    #[error("Unknown exchange: {0}")]
    UnknownExchange(RelayId),

    #[error("Exchange {0} belongs to another connection")]
    NotOwner(RelayId),

    #[error("Outer endpoint of exchange {0} is already set")]
    OuterEndpointAlreadySet(RelayId),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Outbound queue closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, RelayError>;
