// ── Typed notification bus ──
//
// One enum variant per notification category, fanned out through a
// `broadcast` channel. Publishers live on the transport side; each
// controller loop holds its own subscription.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::model::{DeviceId, DfuState, NodeAddress, OtaState};

/// Raw DFU status as delivered by the mesh stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DfuStatusReport {
    pub state: DfuState,
    /// Non-zero only on the terminal error path.
    pub error_code: i32,
    pub payload: Bytes,
}

/// Raw point-to-point OTA status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtaStatusReport {
    pub state: OtaState,
    pub error_code: i32,
    pub transferred: u64,
    pub total: u64,
    /// Free text; carries the application-info string while reading it.
    pub description: String,
}

/// Every notification the controllers consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum MeshEvent {
    /// Unprovisioned beacon seen while scanning.
    DeviceDiscovered {
        device_id: DeviceId,
        name: Option<String>,
        rssi: Option<i16>,
    },
    ProvisionStatus {
        device_id: DeviceId,
        code: i32,
    },
    NetworkDbChanged {
        network: String,
    },
    NodeConnectionChanged {
        address: NodeAddress,
        connected: bool,
    },
    DfuStatus(DfuStatusReport),
    OtaStatus(OtaStatusReport),
}

// ── EventBus ─────────────────────────────────────────────────────

/// Cloneable publisher side of the notification channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<MeshEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver an event to every current subscriber.
    ///
    /// Returns how many subscribers received it; zero is not an error.
    pub fn publish(&self, event: MeshEvent) -> usize {
        self.tx.send(Arc::new(event)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

// ── EventSubscription ────────────────────────────────────────────

/// Receiving side held by a controller loop.
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<Arc<MeshEvent>>,
}

impl EventSubscription {
    /// Wait for the next event.
    ///
    /// Lagging drops the oldest events with a warning rather than failing.
    /// Returns `None` once every [`EventBus`] clone is gone.
    pub async fn recv(&mut self) -> Option<Arc<MeshEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Arc<MeshEvent>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(skipped = n, "event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let delivered = bus.publish(MeshEvent::NetworkDbChanged {
            network: "home".into(),
        });
        assert_eq!(delivered, 2);

        for sub in [&mut a, &mut b] {
            let ev = sub.recv().await.unwrap();
            assert!(matches!(*ev, MeshEvent::NetworkDbChanged { .. }));
        }
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new(8);
        assert_eq!(
            bus.publish(MeshEvent::NetworkDbChanged {
                network: "home".into()
            }),
            0
        );
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_to_newest() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for code in 0..5 {
            bus.publish(MeshEvent::ProvisionStatus {
                device_id: DeviceId::from("d"),
                code,
            });
        }
        let ev = sub.recv().await.unwrap();
        assert!(matches!(*ev, MeshEvent::ProvisionStatus { code: 3, .. }));
    }

    #[tokio::test]
    async fn recv_returns_none_when_bus_dropped() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        drop(bus);
        assert!(sub.recv().await.is_none());
    }
}
