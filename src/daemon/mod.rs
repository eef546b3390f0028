//! Connection-manager daemon seam.
//!
//! The backend never talks to the bus directly: it consumes an ordered
//! stream of [`DaemonEvent`]s from a [`Subscription`] and issues property
//! writes through the [`Daemon`] trait. [`connman::ConnmanDaemon`] is the
//! system-bus implementation; tests drive the backend with in-memory ones.

pub mod connman;
pub mod convert;
pub mod dbus_proxies;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use trait_variant::make;

use crate::error::WcaResult;
use crate::model::{EntityKind, ObjectPath, PropertyMap, PropertyValue};

pub use connman::ConnmanDaemon;

/// One message from the connection manager, in bus order
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonEvent {
    /// Initial manager-level properties
    ManagerProperties(PropertyMap),
    /// Initial full state of one entity kind
    Snapshot {
        kind: EntityKind,
        entities: Vec<(ObjectPath, PropertyMap)>,
    },
    EntityAdded {
        kind: EntityKind,
        path: ObjectPath,
        properties: PropertyMap,
    },
    EntityRemoved {
        kind: EntityKind,
        path: ObjectPath,
    },
    /// Batched service list change (services or saved services)
    ServicesChanged {
        kind: EntityKind,
        added: Vec<(ObjectPath, PropertyMap)>,
        removed: Vec<ObjectPath>,
    },
    PropertyChanged {
        kind: EntityKind,
        path: ObjectPath,
        name: String,
        value: PropertyValue,
    },
    ManagerPropertyChanged {
        name: String,
        value: PropertyValue,
    },
    /// The daemon left the bus
    Disconnected,
}

/// Live subscription to the daemon's event stream.
///
/// Dropping it stops the forwarder task, which unsubscribes from the bus.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<DaemonEvent>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        events: mpsc::UnboundedReceiver<DaemonEvent>,
        forwarder: Option<JoinHandle<()>>,
    ) -> Self {
        Self { events, forwarder }
    }

    /// Subscription fed directly through the returned sender
    pub fn channel() -> (mpsc::UnboundedSender<DaemonEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx, None))
    }

    /// Next event; `None` once the daemon side is gone
    pub async fn next(&mut self) -> Option<DaemonEvent> {
        self.events.recv().await
    }

    /// Handle to stop the forwarder without owning the subscription
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.forwarder.as_ref().map(JoinHandle::abort_handle)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.events.close();
    }
}

/// Operations the backend needs from the connection-manager daemon
#[make(Send)]
pub trait Daemon: Send + Sync + 'static {
    /// Start watching the daemon. The stream must begin with the current
    /// manager properties and one snapshot per entity kind, followed by
    /// incremental events in the order the daemon emitted them.
    async fn subscribe(&self) -> WcaResult<Subscription>;

    async fn set_manager_property(&self, name: &str, value: &PropertyValue) -> WcaResult<()>;

    async fn set_technology_property(
        &self,
        path: &ObjectPath,
        name: &str,
        value: &PropertyValue,
    ) -> WcaResult<()>;
}
