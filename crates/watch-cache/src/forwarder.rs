//! Name-filtering change forwarder.
//!
//! Sessions are bound to a namespace, not to an object, so an informer for a
//! kind sees every object of that kind in the namespace. Each watched object
//! gets its own forwarder that lets through only notifications for its name.

use crate::event::{ChangeNotification, Payload, RawEvent};
use crate::session::EventHandler;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Why a raw notification was not forwarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discard {
    /// The notification carried no payload
    Empty,
    /// The payload was not a resource object
    NotAnObject,
    /// The object is not the one this forwarder is bound to
    NameMismatch {
        /// Name of the object in the notification
        name: String,
    },
}

/// Forwards notifications for one named object onto the shared event stream.
#[derive(Debug, Clone)]
pub struct ChangeForwarder {
    name: String,
    events: mpsc::Sender<ChangeNotification>,
}

impl ChangeForwarder {
    /// Creates a forwarder bound to `name`
    pub fn new(name: impl Into<String>, events: mpsc::Sender<ChangeNotification>) -> Self {
        Self {
            name: name.into(),
            events,
        }
    }

    /// Name the forwarder is bound to
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filters a raw notification into a change notification
    pub fn filter(&self, event: &RawEvent) -> Result<ChangeNotification, Discard> {
        let object = match event.payload() {
            None => return Err(Discard::Empty),
            Some(Payload::Tombstone { .. }) => return Err(Discard::NotAnObject),
            Some(Payload::Object(object)) => object,
        };

        let name = object.metadata.name.as_deref().unwrap_or_default();
        if name != self.name {
            return Err(Discard::NameMismatch { name: name.to_string() });
        }

        Ok(ChangeNotification {
            kind: event.kind(),
            object: Arc::clone(object),
        })
    }
}

#[async_trait::async_trait]
impl EventHandler for ChangeForwarder {
    async fn handle(&self, event: RawEvent) {
        let notification = match self.filter(&event) {
            Ok(notification) => notification,
            Err(reason) => {
                trace!("Forwarder for {} discarded {} event: {:?}", self.name, event.kind(), reason);
                return;
            }
        };

        // Waits for the consumer when the stream is full
        if self.events.send(notification).await.is_err() {
            warn!("Event stream closed, dropping {} event for {}", event.kind(), self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeKind;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::core::{ApiResource, DynamicObject};

    fn config_map(name: &str) -> Arc<DynamicObject> {
        Arc::new(DynamicObject::new(name, &ApiResource::erase::<ConfigMap>(&())).within("kube-system"))
    }

    #[test]
    fn test_filter_matching_name() {
        let (tx, _rx) = mpsc::channel(1);
        let forwarder = ChangeForwarder::new("cc-config", tx);

        let notification = forwarder.filter(&RawEvent::added(config_map("cc-config"))).unwrap();
        assert_eq!(notification.kind, ChangeKind::Added);
        assert_eq!(notification.object.metadata.name.as_deref(), Some("cc-config"));
    }

    #[test]
    fn test_filter_uses_new_state_for_updates() {
        let (tx, _rx) = mpsc::channel(1);
        let forwarder = ChangeForwarder::new("cc-config", tx);

        let event = RawEvent::Updated {
            old: None,
            new: Some(Payload::Object(config_map("cc-config"))),
        };
        assert_eq!(forwarder.filter(&event).unwrap().kind, ChangeKind::Updated);
    }

    #[test]
    fn test_filter_discards() {
        let (tx, _rx) = mpsc::channel(1);
        let forwarder = ChangeForwarder::new("cc-config", tx);

        assert_eq!(forwarder.filter(&RawEvent::Added(None)).unwrap_err(), Discard::Empty);
        assert_eq!(
            forwarder
                .filter(&RawEvent::Deleted(Some(Payload::Tombstone {
                    key: "kube-system/cc-config".to_string()
                })))
                .unwrap_err(),
            Discard::NotAnObject
        );
        assert_eq!(
            forwarder.filter(&RawEvent::deleted(config_map("other-config"))).unwrap_err(),
            Discard::NameMismatch {
                name: "other-config".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_handle_forwards_only_matching() {
        let (tx, mut rx) = mpsc::channel(8);
        let forwarder = ChangeForwarder::new("cc-config", tx);

        forwarder.handle(RawEvent::added(config_map("other-config"))).await;
        forwarder.handle(RawEvent::Added(None)).await;
        forwarder.handle(RawEvent::deleted(config_map("cc-config"))).await;

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.kind, ChangeKind::Deleted);
        assert_eq!(notification.object.metadata.name.as_deref(), Some("cc-config"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_with_closed_stream() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let forwarder = ChangeForwarder::new("cc-config", tx);

        // Must not panic or block
        forwarder.handle(RawEvent::added(config_map("cc-config"))).await;
    }
}
