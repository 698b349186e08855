//! Session lifecycle event bus
//!
//! Fire-and-forget broadcast to decoupled listeners (UI, telemetry). The
//! notifier holds no session state; a slow or absent listener never affects
//! the publisher.

use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Detected {
        session_id: String,
        recovered: bool,
    },
    Updated {
        session_id: String,
    },
    Disconnected {
        session_id: String,
    },
    RecoveryEnabled {
        enabled: bool,
    },
}

#[derive(Clone)]
pub struct EventNotifier {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// A send with no listeners is not an error.
    pub fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("No session event listeners: {}", e);
        }
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_listeners_is_noop() {
        let notifier = EventNotifier::new();
        notifier.publish(SessionEvent::RecoveryEnabled { enabled: true });
    }

    #[tokio::test]
    async fn test_listeners_receive_events() {
        let notifier = EventNotifier::new();
        let mut rx = notifier.subscribe();

        notifier.publish(SessionEvent::Detected {
            session_id: "s1".to_string(),
            recovered: false,
        });
        notifier.publish(SessionEvent::Disconnected {
            session_id: "s1".to_string(),
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Detected {
                session_id: "s1".to_string(),
                recovered: false,
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Disconnected {
                session_id: "s1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_get_a_copy() {
        let notifier = EventNotifier::new();
        let mut rx1 = notifier.subscribe();
        let mut rx2 = notifier.subscribe();

        notifier.publish(SessionEvent::Updated {
            session_id: "s2".to_string(),
        });

        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
