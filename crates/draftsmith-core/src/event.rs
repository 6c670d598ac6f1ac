use crate::types::AgentEvent;

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: AgentEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(AgentEvent::TextDelta("ignored".into()));
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(AgentEvent::TextDelta("a".into()));
        bus.publish(AgentEvent::UsageUpdate {
            input_tokens: 3,
            output_tokens: 4,
        });

        assert!(matches!(rx.recv().await.unwrap(), AgentEvent::TextDelta(t) if t == "a"));
        assert!(matches!(
            rx.recv().await.unwrap(),
            AgentEvent::UsageUpdate { input_tokens: 3, output_tokens: 4 }
        ));
    }
}
