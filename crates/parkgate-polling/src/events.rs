//! Event bus for collaborators (display, persistence, cameras).
//!
//! Backed by a `tokio::sync::broadcast` channel. Publishing never waits: with
//! no subscriber the event is dropped, and a subscriber that falls behind
//! misses the oldest events (`RecvError::Lagged`).

use crate::module::ModuleSnapshot;
use parkgate_access::{DenyReason, MovementId, SequenceEvent, SequenceState};
use parkgate_core::{Direction, Identification, ModuleAddress, ModuleId};
use parkgate_protocol::FrameError;
use parkgate_transport::TransportError;
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;
use tracing::trace;

/// Category of a failed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommErrorKind {
    Timeout,
    PortUnavailable,
    Io,
    /// The reply did not decode.
    Frame,
    /// A well-formed reply from another address.
    WrongAddress,
    /// A well-formed reply with an opcode that does not answer the request.
    UnexpectedReply,
}

impl fmt::Display for CommErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CommErrorKind::Timeout => "timeout",
            CommErrorKind::PortUnavailable => "port unavailable",
            CommErrorKind::Io => "i/o error",
            CommErrorKind::Frame => "bad frame",
            CommErrorKind::WrongAddress => "wrong address",
            CommErrorKind::UnexpectedReply => "unexpected reply",
        };
        f.write_str(text)
    }
}

impl From<&TransportError> for CommErrorKind {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::Timeout { .. } => CommErrorKind::Timeout,
            TransportError::PortUnavailable { .. } => CommErrorKind::PortUnavailable,
            TransportError::Io(_) => CommErrorKind::Io,
        }
    }
}

impl From<&FrameError> for CommErrorKind {
    fn from(_: &FrameError) -> Self {
        CommErrorKind::Frame
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum BusEvent {
    /// Status changed, or the module went online or offline.
    ModuleStateChanged {
        address: ModuleAddress,
        state: ModuleSnapshot,
    },
    /// Access was granted and the movement recorded.
    MovementDetected {
        identification: Identification,
        module_id: ModuleId,
        movement_id: MovementId,
        direction: Direction,
    },
    CommError {
        address: ModuleAddress,
        kind: CommErrorKind,
    },
    AccessDenied {
        identification: Identification,
        module_id: ModuleId,
        reason: DenyReason,
    },
    SequenceViolation {
        address: ModuleAddress,
        from: SequenceState,
        observed: SequenceEvent,
    },
}

impl BusEvent {
    /// Short name, as used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            BusEvent::ModuleStateChanged { .. } => "module_state_changed",
            BusEvent::MovementDetected { .. } => "movement_detected",
            BusEvent::CommError { .. } => "comm_error",
            BusEvent::AccessDenied { .. } => "access_denied",
            BusEvent::SequenceViolation { .. } => "sequence_violation",
        }
    }
}

/// Cloneable publisher; every clone feeds the same subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Bus keeping up to `capacity` events per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Publish `event`, returning how many subscribers it reached.
    pub fn publish(&self, event: BusEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!(event = name, "event_dropped_no_subscribers");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> ModuleAddress {
        ModuleAddress::new(n).unwrap()
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        let delivered = bus.publish(BusEvent::CommError {
            address: addr(1),
            kind: CommErrorKind::Timeout,
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = EventBus::new(4);
        let mut first = bus.subscribe();
        let mut second = bus.clone().subscribe();

        let event = BusEvent::CommError {
            address: addr(3),
            kind: CommErrorKind::Frame,
        };
        assert_eq!(bus.publish(event.clone()), 2);
        assert_eq!(first.recv().await.unwrap(), event);
        assert_eq!(second.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_lagging_subscriber() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for n in 1..=4 {
            bus.publish(BusEvent::CommError {
                address: addr(n),
                kind: CommErrorKind::Timeout,
            });
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn test_json_shape() {
        let event = BusEvent::AccessDenied {
            identification: Identification::new("00001234").unwrap(),
            module_id: ModuleId(4),
            reason: DenyReason::AntipassbackViolation,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event": "access_denied",
                "data": {
                    "identification": "00001234",
                    "module_id": 4,
                    "reason": "antipassback_violation"
                }
            })
        );
    }

    #[test]
    fn test_transport_error_kinds() {
        let timeout = TransportError::timeout(std::time::Duration::from_secs(1));
        assert_eq!(CommErrorKind::from(&timeout), CommErrorKind::Timeout);
        let unavailable = TransportError::port_unavailable("/dev/ttyUSB0", "gone");
        assert_eq!(CommErrorKind::from(&unavailable), CommErrorKind::PortUnavailable);
    }
}
