//! Notifications emitted by storages when their contents change.
use crate::bundle::MetaBundle;
use std::sync::mpsc::Sender;
use std::sync::{Mutex, PoisonError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageEvent {
    Added(MetaBundle),
    Removed {
        meta: MetaBundle,
        reason: RemovalReason,
    },
}

impl StorageEvent {
    pub fn meta(&self) -> &MetaBundle {
        match self {
            StorageEvent::Added(meta) => meta,
            StorageEvent::Removed { meta, .. } => meta,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    /// Removed on request, including purges and `clear()`.
    Deleted,
    /// Lifetime ran out.
    Expired,
    /// The storage could not keep the bundle, e.g. a deferred write failed.
    Depleted,
}

/// Receiver of [`StorageEvent`]s.
///
/// Sinks are invoked while the storage holds its write lock, so they see
/// events in commit order but must not call back into the storage.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: &StorageEvent);
}

impl EventSink for Sender<StorageEvent> {
    fn notify(&self, event: &StorageEvent) {
        // a dropped receiver just stops listening
        let _ = self.send(event.clone());
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct EventLog(Mutex<Vec<StorageEvent>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the events recorded so far.
    pub fn drain(&self) -> Vec<StorageEvent> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl EventSink for EventLog {
    fn notify(&self, event: &StorageEvent) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
