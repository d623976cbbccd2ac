use serde_json::Value;
use tokio::sync::broadcast;

/// High-throughput publisher for entity lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event with the given name and context
    pub fn publish(&self, event_name: impl Into<String>, context: Value) {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };

        // send() errs only when there are no subscribers, which is acceptable
        let _ = self.sender.send(event);
    }

    /// Publish a lifecycle event for one entity
    pub fn publish_entity_event(&self, entity_type: &str, entity_id: &str, event: &str) {
        self.publish(
            format!("{entity_type}.{event}"),
            serde_json::json!({ "entity_id": entity_id }),
        );
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000) // Default capacity of 1000 events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let publisher = EventPublisher::new(16);
        let mut receiver = publisher.subscribe();

        publisher.publish_entity_event("negotiation", "n-1", "requested");

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.name, "negotiation.requested");
        assert_eq!(event.context["entity_id"], "n-1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_a_no_op() {
        let publisher = EventPublisher::new(16);
        publisher.publish_entity_event("transfer", "t-1", "provisioned");
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
