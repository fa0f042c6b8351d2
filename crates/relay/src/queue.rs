//! Outbound packet queue and send pump
//!
//! The receive path only ever enqueues. A separate pump, driven by the
//! network-send tick, drains the queue into the transport for as long as the
//! transport accepts data.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::debug;

/// A packet waiting for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    pub destination: SocketAddr,
    pub data: Vec<u8>,
}

/// Outcome of handing one packet to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    /// Transport is momentarily full; retry on the next tick
    WouldBlock,
    /// Packet cannot be sent; it is discarded
    Failed,
}

/// Fire-and-forget datagram sink used by the send pump
pub trait RawSender: Send + Sync {
    fn try_send(&self, destination: SocketAddr, data: &[u8]) -> SendStatus;
}

struct Pump {
    rx: mpsc::UnboundedReceiver<OutboundPacket>,
    /// Packet the transport refused last tick
    parked: Option<OutboundPacket>,
}

/// Multi-producer queue with a single draining pump
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<OutboundPacket>,
    pump: Mutex<Pump>,
    pending: AtomicUsize,
}

impl OutboundQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            pump: Mutex::new(Pump { rx, parked: None }),
            pending: AtomicUsize::new(0),
        }
    }

    /// Queue a packet without blocking
    pub fn enqueue(&self, destination: SocketAddr, data: Vec<u8>) -> bool {
        match self.tx.send(OutboundPacket { destination, data }) {
            Ok(()) => {
                self.pending.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    /// Packets queued or parked
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send up to `max` packets. Returns how many left the queue.
    ///
    /// Never blocks: if another pump is draining, or the transport reports
    /// `WouldBlock`, this returns early and the rest waits for the next tick.
    pub fn drain(&self, sender: &dyn RawSender, max: usize) -> usize {
        let Some(mut pump) = self.pump.try_lock() else {
            return 0;
        };

        let mut drained = 0;
        while drained < max {
            let packet = match pump.parked.take() {
                Some(packet) => packet,
                None => match pump.rx.try_recv() {
                    Ok(packet) => packet,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                },
            };

            match sender.try_send(packet.destination, &packet.data) {
                SendStatus::Sent => {}
                SendStatus::Failed => {
                    debug!(destination = %packet.destination, "Discarding unsendable packet");
                }
                SendStatus::WouldBlock => {
                    pump.parked = Some(packet);
                    break;
                }
            }
            drained += 1;
            self.pending.fetch_sub(1, Ordering::Relaxed);
        }
        drained
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}
