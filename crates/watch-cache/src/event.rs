//! Change events.
//!
//! Raw notifications produced by watch sessions, the filtered change
//! notifications delivered to callers, and the consolidated event stream.

use futures::Stream;
use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Kind of change observed for an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Object appeared in the cache
    Added,
    /// Object changed, or was re-delivered on resync
    Updated,
    /// Object was removed
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => f.write_str("added"),
            Self::Updated => f.write_str("updated"),
            Self::Deleted => f.write_str("deleted"),
        }
    }
}

/// Payload attached to a raw notification
#[derive(Debug, Clone)]
pub enum Payload {
    /// A resource object
    Object(Arc<DynamicObject>),
    /// A deletion whose final object state is unknown
    Tombstone {
        /// `namespace/name` of the deleted object, as far as it is known
        key: String,
    },
}

/// Raw add/update/delete notification from a watch session
#[derive(Debug, Clone)]
pub enum RawEvent {
    /// Object added
    Added(Option<Payload>),
    /// Object updated
    Updated {
        /// Previous state
        old: Option<Payload>,
        /// Current state
        new: Option<Payload>,
    },
    /// Object deleted
    Deleted(Option<Payload>),
}

impl RawEvent {
    /// Added event for an object
    #[must_use]
    pub fn added(obj: Arc<DynamicObject>) -> Self {
        Self::Added(Some(Payload::Object(obj)))
    }

    /// Updated event between two object states
    #[must_use]
    pub fn updated(old: Arc<DynamicObject>, new: Arc<DynamicObject>) -> Self {
        Self::Updated {
            old: Some(Payload::Object(old)),
            new: Some(Payload::Object(new)),
        }
    }

    /// Deleted event for an object
    #[must_use]
    pub fn deleted(obj: Arc<DynamicObject>) -> Self {
        Self::Deleted(Some(Payload::Object(obj)))
    }

    /// Change kind
    #[must_use]
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Added(_) => ChangeKind::Added,
            Self::Updated { .. } => ChangeKind::Updated,
            Self::Deleted(_) => ChangeKind::Deleted,
        }
    }

    /// Payload the event is about (the new state for updates)
    #[must_use]
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Added(p) | Self::Deleted(p) | Self::Updated { new: p, .. } => p.as_ref(),
        }
    }
}

/// A delivered change for one watched object
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    /// What happened
    pub kind: ChangeKind,
    /// The object it happened to
    pub object: Arc<DynamicObject>,
}

/// Receive-only handle on the consolidated change stream.
///
/// Clones share the one underlying receiver, so every notification is
/// observed by exactly one reader.
#[derive(Debug, Clone)]
pub struct EventStream {
    rx: Arc<Mutex<mpsc::Receiver<ChangeNotification>>>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::Receiver<ChangeNotification>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Waits for the next notification.
    ///
    /// Returns `None` once the cache and all of its forwarders are gone.
    pub async fn recv(&self) -> Option<ChangeNotification> {
        self.rx.lock().await.recv().await
    }

    /// Next notification if one is already queued.
    ///
    /// Also returns `None` while another clone is parked in
    /// [`EventStream::recv`], even if notifications are queued; only rely on
    /// it when this handle is the sole reader.
    #[must_use]
    pub fn try_recv(&self) -> Option<ChangeNotification> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Returns true when both handles read from the same stream
    #[must_use]
    pub fn same_stream(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.rx, &other.rx)
    }

    /// Adapts the handle into a `Stream`
    pub fn into_stream(self) -> impl Stream<Item = ChangeNotification> + Send {
        futures::stream::unfold(self, |events| async move {
            let next = events.recv().await?;
            Some((next, events))
        })
    }
}
