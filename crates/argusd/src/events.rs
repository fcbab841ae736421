//! Outward state push.
//!
//! Events are fire-and-forget: publishing never blocks and an event with
//! no subscriber is simply dropped.

use argus_protocol::PushEvent;
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the event channel; slow subscribers lag beyond this.
const EVENT_BUFFER: usize = 64;

#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<PushEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub fn publish(&self, event: PushEvent) {
        trace!(event = event.name(), "Publishing event");
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::ArmType;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let events = EventPublisher::new();
        events.publish(PushEvent::ArmStateChange(ArmType::Away));

        let mut rx = events.subscribe();
        events.publish(PushEvent::ArmStateChange(ArmType::Stay));
        assert_eq!(
            rx.recv().await.unwrap(),
            PushEvent::ArmStateChange(ArmType::Stay)
        );
    }
}
