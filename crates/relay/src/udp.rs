//! UDP transport for relay traffic

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::agent::{LocalPacket, RelayAgent, RelayVerdict};
use crate::queue::{RawSender, SendStatus};

/// Largest datagram the receive loop accepts
const MAX_DATAGRAM: usize = 65_535;

/// Non-blocking sender over a shared UDP socket
#[derive(Clone)]
pub struct UdpSender {
    socket: Arc<UdpSocket>,
}

impl UdpSender {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

impl RawSender for UdpSender {
    fn try_send(&self, destination: SocketAddr, data: &[u8]) -> SendStatus {
        match self.socket.try_send_to(data, destination) {
            Ok(_) => SendStatus::Sent,
            Err(e) if e.kind() == ErrorKind::WouldBlock => SendStatus::WouldBlock,
            Err(e) => {
                debug!(destination = %destination, error = %e, "UDP send failed");
                SendStatus::Failed
            }
        }
    }
}

/// Receive loop: feed every datagram on `socket` to `agent`.
///
/// Packets delivered to this node go to `local_tx`. Returns when the socket
/// fails or the local receiver is dropped.
pub async fn serve_udp(
    agent: Arc<RelayAgent>,
    socket: Arc<UdpSocket>,
    local_tx: mpsc::UnboundedSender<LocalPacket>,
) -> std::io::Result<()> {
    if let Ok(addr) = socket.local_addr() {
        info!(addr = %addr, "Relay listening");
    }

    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, source) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            // ICMP unreachable from an earlier send surfaces here on some platforms
            Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
            Err(e) => {
                warn!(error = %e, "UDP receive failed");
                return Err(e);
            }
        };

        if let RelayVerdict::Delivered(packet) = agent.process_packet(source, &buf[..len]) {
            if local_tx.send(packet).is_err() {
                debug!("Local packet receiver dropped, stopping relay loop");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::ConnectionInfo;
    use hopcraft_core::{CreateRelayRequest, ExchangeFlags, NetAddress};
    use hopcraft_crypto::{compose_packet, random_embryo, wrap_body, RelayHeader, RoutingPrefix};
    use std::time::Duration;

    #[tokio::test]
    async fn test_udp_local_delivery() {
        let relay_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let relay_addr = relay_socket.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let agent = Arc::new(RelayAgent::new(AgentConfig::default()));
        let embryo = random_embryo();
        let conn = ConnectionInfo {
            remote: client_addr,
            embryo,
        };
        let request = CreateRelayRequest {
            inner_address: None,
            inner_relay_id: 11,
            flags: ExchangeFlags::empty(),
            retention_secs: None,
        };
        let (inner_id, _) = agent.add_exchange(&conn, &request).unwrap();

        let (local_tx, mut local_rx) = mpsc::unbounded_channel();
        let server = tokio::spawn(serve_udp(Arc::clone(&agent), relay_socket, local_tx));

        let body = RelayHeader::random(NetAddress::Local)
            .build_body(b"over udp", &[])
            .unwrap();
        let packet = compose_packet(RoutingPrefix::new(11, inner_id), &wrap_body(&embryo, &body).unwrap());
        client.send_to(&packet, relay_addr).await.unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(2), local_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.payload, b"over udp");
        assert_eq!(delivered.relay_id, inner_id);

        server.abort();
    }

    #[tokio::test]
    async fn test_udp_sender_sends() {
        let a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let sender = UdpSender::new(a);
        assert_eq!(
            sender.try_send(b.local_addr().unwrap(), b"datagram"),
            SendStatus::Sent
        );

        let mut buf = [0u8; 32];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), b.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"datagram");
    }
}
