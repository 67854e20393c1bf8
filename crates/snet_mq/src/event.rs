//! Host diagnostic events
//!
//! Everything the host does asynchronously (discovery, binding, opening,
//! delivery) is reported as a [`HostEvent`] on a broadcast channel. Nothing
//! here is fatal; observers subscribe for visibility.

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::produce::Payload;
use crate::result::OperateResult;

// ─────────────────────────────────────────────────────────────────────────────
// Host Event
// ─────────────────────────────────────────────────────────────────────────────

/// An asynchronous diagnostic from the plugin host
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    /// A backend type was registered from a module
    TypeRegistered { type_name: String, module: String },

    /// A backend type was removed
    TypeUnregistered { type_name: String },

    /// A module could not be loaded
    ModuleFailed { path: PathBuf, message: String },

    /// An instance was constructed from its config
    InstanceCreated { key: String },

    /// An instance was closed and removed
    InstanceRemoved { key: String },

    /// Config binding or instantiation failed
    ConfigFailed { path: PathBuf, message: String },

    /// An instance opened
    Opened { key: String },

    /// An instance failed to open and was queued for retry
    OpenFailed { key: String, message: String },

    /// Per-instance outcome of one produce
    Produced {
        key: String,
        topic: String,
        result: OperateResult,
    },

    /// Target keys of a produce that matched no instance
    UnknownTargets { topic: String, keys: Vec<String> },

    /// A message arrived on a consumed topic
    Received {
        key: String,
        topic: String,
        payload: Payload,
    },

    /// A file-system watcher reported an error
    WatcherError { message: String },
}

impl HostEvent {
    /// Short event name, for logging and filtering
    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::TypeRegistered { .. } => "type_registered",
            HostEvent::TypeUnregistered { .. } => "type_unregistered",
            HostEvent::ModuleFailed { .. } => "module_failed",
            HostEvent::InstanceCreated { .. } => "instance_created",
            HostEvent::InstanceRemoved { .. } => "instance_removed",
            HostEvent::ConfigFailed { .. } => "config_failed",
            HostEvent::Opened { .. } => "opened",
            HostEvent::OpenFailed { .. } => "open_failed",
            HostEvent::Produced { .. } => "produced",
            HostEvent::UnknownTargets { .. } => "unknown_targets",
            HostEvent::Received { .. } => "received",
            HostEvent::WatcherError { .. } => "watcher_error",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Publisher
// ─────────────────────────────────────────────────────────────────────────────

/// A handle for publishing host events
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<HostEvent>,
}

impl EventPublisher {
    /// Create a publisher with its own channel
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: HostEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.tx.subscribe()
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let publisher = EventPublisher::new(16);
        let mut rx = publisher.subscribe();

        publisher.publish(HostEvent::Opened { key: "A.1".into() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "opened");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let publisher = EventPublisher::new(4);
        publisher.publish(HostEvent::InstanceRemoved { key: "A.1".into() });
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = HostEvent::UnknownTargets {
            topic: "t".into(),
            keys: vec!["X.1".into()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "unknown_targets");
        assert_eq!(json["keys"][0], "X.1");
    }
}
