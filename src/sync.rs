//! Mirror of the connection manager's object graph.
//!
//! The [`Synchronizer`] folds daemon events into the mirrored entity sets
//! and turns each of them into the [`Notification`]s owed to the subscriber.
//! It never invokes callbacks itself; the session task delivers the returned
//! notifications in order once the mirror lock is released.

use std::collections::HashSet;
use std::fmt;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::callbacks::UpdateCallbacks;
use crate::daemon::DaemonEvent;
use crate::model::{EntityKind, Mirror, ObjectPath, PropertyMap, PropertyValue};

/// Synchronization state of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Unsubscribed,
    Priming,
    Synchronized,
    Degraded,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Priming => "priming",
            Self::Synchronized => "synchronized",
            Self::Degraded => "degraded",
        };
        f.write_str(label)
    }
}

/// One callback invocation owed to the subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ServicesChanged {
        added: Vec<(ObjectPath, PropertyMap)>,
        removed: Vec<ObjectPath>,
    },
    ServicePropertyChanged {
        path: ObjectPath,
        name: String,
        value: PropertyValue,
    },
    SavedServicesChanged {
        added: Vec<(ObjectPath, PropertyMap)>,
        removed: Vec<ObjectPath>,
    },
    ManagerPropertyChanged {
        name: String,
        value: PropertyValue,
    },
    TechnologyAdded {
        path: ObjectPath,
        properties: PropertyMap,
    },
    TechnologyRemoved {
        path: ObjectPath,
    },
    TechnologyPropertyChanged {
        path: ObjectPath,
        name: String,
        value: PropertyValue,
    },
    GroupAdded {
        path: ObjectPath,
        properties: PropertyMap,
    },
    GroupRemoved {
        path: ObjectPath,
    },
    GroupPropertyChanged {
        path: ObjectPath,
        name: String,
        value: PropertyValue,
    },
}

impl Notification {
    pub fn deliver(&self, callbacks: &dyn UpdateCallbacks) {
        match self {
            Self::ServicesChanged { added, removed } => {
                callbacks.services_changed(added, removed)
            }
            Self::ServicePropertyChanged { path, name, value } => {
                callbacks.service_property_changed(path, name, value)
            }
            Self::SavedServicesChanged { added, removed } => {
                callbacks.saved_services_changed(added, removed)
            }
            Self::ManagerPropertyChanged { name, value } => {
                callbacks.manager_property_changed(name, value)
            }
            Self::TechnologyAdded { path, properties } => {
                callbacks.technology_added(path, properties)
            }
            Self::TechnologyRemoved { path } => callbacks.technology_removed(path),
            Self::TechnologyPropertyChanged { path, name, value } => {
                callbacks.technology_property_changed(path, name, value)
            }
            Self::GroupAdded { path, properties } => callbacks.group_added(path, properties),
            Self::GroupRemoved { path } => callbacks.group_removed(path),
            Self::GroupPropertyChanged { path, name, value } => {
                callbacks.group_property_changed(path, name, value)
            }
        }
    }

    fn added(kind: EntityKind, path: ObjectPath, properties: PropertyMap) -> Self {
        match kind {
            EntityKind::Technology => Self::TechnologyAdded { path, properties },
            EntityKind::Group => Self::GroupAdded { path, properties },
            EntityKind::Service => Self::ServicesChanged {
                added: vec![(path, properties)],
                removed: Vec::new(),
            },
            EntityKind::SavedService => Self::SavedServicesChanged {
                added: vec![(path, properties)],
                removed: Vec::new(),
            },
        }
    }

    fn removed(kind: EntityKind, path: ObjectPath) -> Self {
        match kind {
            EntityKind::Technology => Self::TechnologyRemoved { path },
            EntityKind::Group => Self::GroupRemoved { path },
            EntityKind::Service => Self::ServicesChanged {
                added: Vec::new(),
                removed: vec![path],
            },
            EntityKind::SavedService => Self::SavedServicesChanged {
                added: Vec::new(),
                removed: vec![path],
            },
        }
    }

    /// Only services and saved services are announced as lists
    fn list_changed(
        kind: EntityKind,
        added: Vec<(ObjectPath, PropertyMap)>,
        removed: Vec<ObjectPath>,
    ) -> Option<Self> {
        match kind {
            EntityKind::Service => Some(Self::ServicesChanged { added, removed }),
            EntityKind::SavedService => Some(Self::SavedServicesChanged { added, removed }),
            EntityKind::Technology | EntityKind::Group => None,
        }
    }

    /// Saved services have no property-change entry in the callback table
    fn property_changed(
        kind: EntityKind,
        path: ObjectPath,
        name: String,
        value: PropertyValue,
    ) -> Option<Self> {
        match kind {
            EntityKind::Technology => Some(Self::TechnologyPropertyChanged { path, name, value }),
            EntityKind::Group => Some(Self::GroupPropertyChanged { path, name, value }),
            EntityKind::Service => Some(Self::ServicePropertyChanged { path, name, value }),
            EntityKind::SavedService => None,
        }
    }
}

/// What an applied event did to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    /// Every kind delivered its initial snapshot
    Synchronized,
    /// The daemon went away; `was_synchronized` is false while priming
    Lost { was_synchronized: bool },
}

pub struct Synchronizer {
    mirror: Mirror,
    primed: HashSet<EntityKind>,
    manager_primed: bool,
    state: watch::Sender<SyncState>,
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synchronizer {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SyncState::Unsubscribed);
        Self {
            mirror: Mirror::default(),
            primed: HashSet::new(),
            manager_primed: false,
            state,
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    fn set_state(&self, state: SyncState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Synchronizer state {} -> {}", previous, state);
        }
    }

    /// Subscription request issued
    pub fn begin(&mut self) {
        self.mirror.clear();
        self.primed.clear();
        self.manager_primed = false;
        self.set_state(SyncState::Priming);
    }

    /// Drop everything without notifying; used on release
    pub fn reset(&mut self) {
        self.mirror.clear();
        self.primed.clear();
        self.manager_primed = false;
        self.set_state(SyncState::Unsubscribed);
    }

    /// Fold one daemon event into the mirror
    pub fn apply(&mut self, event: DaemonEvent) -> (Vec<Notification>, Transition) {
        let mut notes = Vec::new();
        match self.state() {
            SyncState::Priming | SyncState::Synchronized => {}
            state => {
                debug!("Ignoring daemon event while {}", state);
                return (notes, Transition::None);
            }
        }

        match event {
            DaemonEvent::Disconnected => return self.disconnect(),
            DaemonEvent::ManagerProperties(properties) => {
                let mut properties: Vec<_> = properties.into_iter().collect();
                properties.sort_by(|a, b| a.0.cmp(&b.0));
                for (name, value) in properties {
                    self.mirror.manager.insert(name.clone(), value.clone());
                    notes.push(Notification::ManagerPropertyChanged { name, value });
                }
                self.manager_primed = true;
            }
            DaemonEvent::Snapshot { kind, entities } => {
                debug!("Initial {} snapshot: {} entities", kind, entities.len());
                let set = self.mirror.set_mut(kind);
                for (path, properties) in &entities {
                    set.insert(path.clone(), properties.clone());
                }
                match kind {
                    EntityKind::Technology | EntityKind::Group => {
                        notes.extend(entities.into_iter().map(|(path, properties)| {
                            Notification::added(kind, path, properties)
                        }));
                    }
                    EntityKind::Service | EntityKind::SavedService => {
                        notes.extend(Notification::list_changed(kind, entities, Vec::new()));
                    }
                }
                self.primed.insert(kind);
            }
            DaemonEvent::EntityAdded {
                kind,
                path,
                properties,
            } => {
                self.mirror
                    .set_mut(kind)
                    .insert(path.clone(), properties.clone());
                notes.push(Notification::added(kind, path, properties));
            }
            DaemonEvent::EntityRemoved { kind, path } => {
                if self.mirror.set_mut(kind).remove(&path).is_some() {
                    notes.push(Notification::removed(kind, path));
                } else {
                    debug!("Dropping removal of unknown {} {}", kind, path);
                }
            }
            DaemonEvent::ServicesChanged {
                kind,
                added,
                removed,
            } => {
                if !matches!(kind, EntityKind::Service | EntityKind::SavedService) {
                    warn!("Skipping list change for unexpected kind {}", kind);
                    return (notes, Transition::None);
                }
                // Entries for known services carry only the changed properties
                let set = self.mirror.set_mut(kind);
                for (path, properties) in &added {
                    set.upsert(path.clone(), properties.clone());
                }
                let removed: Vec<_> = removed
                    .into_iter()
                    .filter(|path| {
                        let known = set.remove(path).is_some();
                        if !known {
                            debug!("Dropping removal of unknown {} {}", kind, path);
                        }
                        known
                    })
                    .collect();
                if !added.is_empty() || !removed.is_empty() {
                    notes.extend(Notification::list_changed(kind, added, removed));
                }
            }
            DaemonEvent::PropertyChanged {
                kind,
                path,
                name,
                value,
            } => {
                if self
                    .mirror
                    .set_mut(kind)
                    .set_property(&path, &name, value.clone())
                {
                    notes.extend(Notification::property_changed(kind, path, name, value));
                } else {
                    debug!("Dropping {} change for unknown {} {}", name, kind, path);
                }
            }
            DaemonEvent::ManagerPropertyChanged { name, value } => {
                self.mirror.manager.insert(name.clone(), value.clone());
                notes.push(Notification::ManagerPropertyChanged { name, value });
            }
        }

        let transition = if self.state() == SyncState::Priming && self.fully_primed() {
            info!("Initial snapshot complete");
            self.set_state(SyncState::Synchronized);
            Transition::Synchronized
        } else {
            Transition::None
        };
        (notes, transition)
    }

    fn fully_primed(&self) -> bool {
        self.manager_primed && EntityKind::ALL.iter().all(|k| self.primed.contains(k))
    }

    /// Connection to the daemon lost: retire every mirrored entity, one
    /// removal per entity grouped by kind, then report the manager offline.
    pub fn disconnect(&mut self) -> (Vec<Notification>, Transition) {
        let was_synchronized = match self.state() {
            SyncState::Synchronized => true,
            SyncState::Priming => false,
            _ => return (Vec::new(), Transition::None),
        };
        if was_synchronized {
            self.set_state(SyncState::Degraded);
        }

        let mut notes = Vec::new();
        for kind in EntityKind::ALL {
            for (path, _) in self.mirror.set_mut(kind).drain() {
                notes.push(Notification::removed(kind, path));
            }
        }
        if !self.mirror.manager.is_empty() {
            self.mirror.manager.clear();
            notes.push(Notification::ManagerPropertyChanged {
                name: "State".into(),
                value: "offline".into(),
            });
        }
        info!("Daemon connection lost; retired {} entities", notes.len());
        (notes, Transition::Lost { was_synchronized })
    }

    /// Finish the teardown that followed a lost connection
    pub fn finish(&mut self) {
        self.primed.clear();
        self.manager_primed = false;
        self.set_state(SyncState::Unsubscribed);
    }
}
