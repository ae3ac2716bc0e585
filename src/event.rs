//! Event Delivery
//!
//! Fire-and-forget delivery of device events to registered listeners.

use tokio::sync::broadcast;

use crate::device::DeviceEvent;

/// Sink for device events
pub trait EventSink: Send + Sync {
    /// Deliver an event, best effort
    fn post(&self, event: DeviceEvent);

    /// Register a listener. Dropping the receiver unregisters it.
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;
}

/// Broadcasts device events to every subscribed listener
pub struct EventDispatcher {
    sender: broadcast::Sender<DeviceEvent>,
}

impl EventDispatcher {
    /// Create a dispatcher buffering up to `buffer_size` undelivered events
    /// per listener
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for EventDispatcher {
    fn post(&self, event: DeviceEvent) {
        tracing::trace!(device = %event.device.id, "Posting {}", event.event_type);
        if self.sender.send(event).is_err() {
            tracing::trace!("No listeners registered, event dropped");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }
}
