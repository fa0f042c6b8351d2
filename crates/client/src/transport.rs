//! Seams to the authenticated hop transport
//!
//! The handshake that produces embryo material, and the delivery of control
//! messages, live outside this crate.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use hopcraft_core::{ControlMessage, ControlResponse, EmbryoKey};

use crate::Result;

/// An authenticated connection to one relay
#[async_trait]
pub trait RelayConnection: Send + Sync {
    /// Address the relay sends and receives relay traffic on
    fn remote(&self) -> SocketAddr;

    /// Key material agreed during the handshake
    fn embryo(&self) -> EmbryoKey;

    fn is_closed(&self) -> bool;

    /// Send a control message and wait for the relay's answer
    async fn send_control(&self, message: ControlMessage) -> Result<ControlResponse>;
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Open (or reuse) an authenticated connection to `address`
    async fn connect(&self, address: SocketAddr) -> Result<Arc<dyn RelayConnection>>;
}
