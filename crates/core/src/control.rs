//! Control messages exchanged over the authenticated hop connection
//!
//! The client sends these while growing and tearing down a circuit. Delivery
//! and request/response correlation belong to the transport.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{ExchangeFlags, HopcraftError, NetEndpoint, RelayId, Result};

/// Ask a relay to open an exchange for a new hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRelayRequest {
    /// Address of the inner neighbour. `None` means the requesting connection itself.
    pub inner_address: Option<SocketAddr>,
    /// Relay id the inner neighbour expects on return traffic
    pub inner_relay_id: RelayId,
    pub flags: ExchangeFlags,
    /// Requested idle retention, clamped by the relay
    pub retention_secs: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    CreateRelay(CreateRelayRequest),
    /// Tell an existing hop where its outer neighbour lives
    SetOuterEndpoint {
        relay_id: RelayId,
        endpoint: NetEndpoint,
    },
    /// Forget the outer neighbour, making the hop the exit again
    ClearOuterEndpoint {
        relay_id: RelayId,
    },
    CloseRelay {
        relay_id: RelayId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlResponse {
    Created { inner_id: RelayId, outer_id: RelayId },
    Accepted,
    Rejected(String),
}

impl ControlMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| HopcraftError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| HopcraftError::SerializationError(e.to_string()))
    }
}

impl ControlResponse {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| HopcraftError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| HopcraftError::SerializationError(e.to_string()))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ControlResponse::Rejected(_))
    }
}
