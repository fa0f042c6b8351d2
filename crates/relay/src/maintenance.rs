//! Periodic work of a relay node: the send pump and the exchange sweep

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

use crate::agent::RelayAgent;
use crate::queue::RawSender;

/// Drive `agent` on its configured send and clean intervals.
///
/// Runs until the returned task is aborted.
pub fn spawn_maintenance<S>(agent: Arc<RelayAgent>, sender: S) -> JoinHandle<()>
where
    S: RawSender + 'static,
{
    tokio::spawn(async move {
        let mut send_tick = interval(agent.config().send_interval);
        send_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut clean_tick = interval(agent.config().clean_interval);
        clean_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!("Relay maintenance started");
        loop {
            tokio::select! {
                _ = send_tick.tick() => {
                    let sent = agent.process_send(&sender);
                    if sent > 0 {
                        trace!(sent, "Send pump drained packets");
                    }
                }
                _ = clean_tick.tick() => {
                    let removed = agent.clean();
                    if removed > 0 {
                        debug!(removed, remaining = agent.exchange_count(), "Swept idle exchanges");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::queue::tests::RecordingSender;
    use std::net::SocketAddr;
    use std::time::Duration;

    struct Shared(Arc<RecordingSender>);

    impl RawSender for Shared {
        fn try_send(&self, destination: SocketAddr, data: &[u8]) -> crate::SendStatus {
            self.0.try_send(destination, data)
        }
    }

    #[tokio::test]
    async fn test_maintenance_drains_queue() {
        let agent = Arc::new(RelayAgent::new(AgentConfig::default()));
        let recorder = Arc::new(RecordingSender::unlimited());

        let conn = crate::ConnectionInfo {
            remote: "127.0.0.1:9100".parse().unwrap(),
            embryo: hopcraft_crypto::random_embryo(),
        };
        let request = hopcraft_core::CreateRelayRequest {
            inner_address: None,
            inner_relay_id: 3,
            flags: hopcraft_core::ExchangeFlags::empty(),
            retention_secs: None,
        };
        let (inner_id, _) = agent.add_exchange(&conn, &request).unwrap();
        agent.send_local(inner_id, b"tick").unwrap();
        assert_eq!(agent.pending_sends(), 1);

        let handle = spawn_maintenance(Arc::clone(&agent), Shared(Arc::clone(&recorder)));
        for _ in 0..50 {
            if agent.pending_sends() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(agent.pending_sends(), 0);
        assert_eq!(recorder.take().len(), 1);
    }
}
