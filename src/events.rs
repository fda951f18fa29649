use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::registry::SegmentStatus;

/// Outbound events consumed by UI/dashboard collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UnitEvent {
    #[serde(rename_all = "camelCase")]
    SaveStatusChanged {
        is_saving: bool,
        last_saved_at: Option<DateTime<Utc>>,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    SegmentStatusChanged {
        segment_id: String,
        status: SegmentStatus,
        timestamp: DateTime<Utc>,
    },

    /// Fired exactly once when every segment in the unit reaches Approved.
    #[serde(rename_all = "camelCase")]
    UnitCompleted {
        unit_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A remote edit collided with a local uncommitted edit. Requires an
    /// explicit resolution action; nothing is overwritten automatically.
    #[serde(rename_all = "camelCase")]
    ConflictDetected {
        segment_id: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for `UnitEvent`s.
///
/// Bounded channel; a lagging subscriber observes `Lagged` and should re-pull
/// full unit state rather than replaying missed status events.
#[derive(Clone)]
pub struct UnitEventBus {
    tx: broadcast::Sender<UnitEvent>,
}

impl UnitEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UnitEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers. Events published while no
    /// subscriber is attached are dropped silently.
    pub fn emit(&self, event: UnitEvent) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        if let Err(err) = self.tx.send(event) {
            warn!("failed to broadcast unit event: {err}");
        }
    }
}

impl Default for UnitEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = UnitEventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(UnitEvent::UnitCompleted {
            unit_id: "unit-1".into(),
            timestamp: Utc::now(),
        });

        match rx.recv().await.expect("event") {
            UnitEvent::UnitCompleted { unit_id, .. } => assert_eq!(unit_id, "unit-1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_a_no_op() {
        let bus = UnitEventBus::new(8);
        bus.emit(UnitEvent::ConflictDetected {
            segment_id: "s1".into(),
            timestamp: Utc::now(),
        });
    }
}
