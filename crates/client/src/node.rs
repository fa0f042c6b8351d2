use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use hopcraft_core::{EmbryoKey, NetEndpoint, RelayId};

use crate::transport::RelayConnection;

/// One hop of a circuit as the client sees it
#[derive(Clone)]
pub struct RelayNode {
    pub address: SocketAddr,
    /// Id the relay assigned to the client-facing side of its exchange
    pub inner_id: RelayId,
    /// Id the relay uses towards the next hop
    pub outer_id: RelayId,
    pub embryo: EmbryoKey,
    connection: Arc<dyn RelayConnection>,
}

impl RelayNode {
    pub fn new(connection: Arc<dyn RelayConnection>, inner_id: RelayId, outer_id: RelayId) -> Self {
        Self {
            address: connection.remote(),
            inner_id,
            outer_id,
            embryo: connection.embryo(),
            connection,
        }
    }

    /// Where packets for this hop are sent
    pub fn endpoint(&self) -> NetEndpoint {
        NetEndpoint::new(self.inner_id, self.address)
    }

    pub fn connection(&self) -> &Arc<dyn RelayConnection> {
        &self.connection
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }
}

impl fmt::Debug for RelayNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayNode")
            .field("address", &self.address)
            .field("inner_id", &self.inner_id)
            .field("outer_id", &self.outer_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
