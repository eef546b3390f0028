use std::collections::HashMap;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zbus::message::Type as MessageType;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};
use zbus::{Connection, MatchRule, Message, MessageStream};

use crate::daemon::convert::{
    to_entities, to_object_path, to_property_map, to_property_value, to_value,
};
use crate::daemon::dbus_proxies::*;
use crate::daemon::{Daemon, DaemonEvent, Subscription};
use crate::error::{WcaError, WcaResult};
use crate::model::{EntityKind, ObjectPath, PropertyValue};

/// Bound on signals buffered between the bus and the forwarder task
const SIGNAL_QUEUE: usize = 1024;

/// ConnMan over the system D-Bus.
pub struct ConnmanDaemon {
    connection: Connection,
}

impl ConnmanDaemon {
    /// Connect to the system D-Bus
    pub async fn system() -> WcaResult<Self> {
        let connection = Connection::system().await?;
        Ok(Self { connection })
    }

    /// Check if ConnMan is running
    pub async fn is_running(&self) -> bool {
        let proxy = match ManagerProxy::new(&self.connection).await {
            Ok(p) => p,
            Err(_) => return false,
        };
        proxy.get_properties().await.is_ok()
    }

    async fn technology_proxy(&self, path: &ObjectPath) -> WcaResult<TechnologyProxy<'_>> {
        Ok(TechnologyProxy::builder(&self.connection)
            .path(path.as_str().to_owned())?
            .build()
            .await?)
    }
}

impl Daemon for ConnmanDaemon {
    async fn subscribe(&self) -> WcaResult<Subscription> {
        // Match rules go in before the snapshot so no change falls between them
        let signals =
            MessageStream::for_match_rule(signal_rule()?, &self.connection, Some(SIGNAL_QUEUE))
                .await?;
        let owner = MessageStream::for_match_rule(owner_rule()?, &self.connection, None).await?;

        let manager = ManagerProxy::new(&self.connection).await?;
        let properties = manager.get_properties().await.map_err(classify)?;
        let technologies = manager.get_technologies().await.map_err(classify)?;
        let services = manager.get_services().await.map_err(classify)?;
        let saved_services = optional_list(manager.get_saved_services().await, "GetSavedServices")?;
        let groups = optional_list(manager.get_groups().await, "GetGroups")?;

        info!(
            "ConnMan snapshot: {} technologies, {} services, {} saved, {} groups",
            technologies.len(),
            services.len(),
            saved_services.len(),
            groups.len()
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let snapshot = [
            DaemonEvent::ManagerProperties(to_property_map(&properties)),
            DaemonEvent::Snapshot {
                kind: EntityKind::Technology,
                entities: to_entities(technologies),
            },
            DaemonEvent::Snapshot {
                kind: EntityKind::Service,
                entities: to_entities(services),
            },
            DaemonEvent::Snapshot {
                kind: EntityKind::SavedService,
                entities: to_entities(saved_services),
            },
            DaemonEvent::Snapshot {
                kind: EntityKind::Group,
                entities: to_entities(groups),
            },
        ];
        for event in snapshot {
            // Receiver is alive: it is returned below
            let _ = tx.send(event);
        }

        let forwarder = tokio::spawn(forward_signals(signals, owner, tx));
        Ok(Subscription::new(rx, Some(forwarder)))
    }

    async fn set_manager_property(&self, name: &str, value: &PropertyValue) -> WcaResult<()> {
        let proxy = ManagerProxy::new(&self.connection).await?;
        let value = to_value(value)?;
        proxy.set_property(name, &value).await.map_err(classify)?;
        debug!("Manager property {} set", name);
        Ok(())
    }

    async fn set_technology_property(
        &self,
        path: &ObjectPath,
        name: &str,
        value: &PropertyValue,
    ) -> WcaResult<()> {
        let proxy = self.technology_proxy(path).await?;
        let value = to_value(value)?;
        proxy.set_property(name, &value).await.map_err(classify)?;
        debug!("Technology {} property {} set", path, name);
        Ok(())
    }
}

// ── Signal forwarding ─────────────────────────────────────────────────

fn signal_rule() -> WcaResult<MatchRule<'static>> {
    Ok(MatchRule::builder()
        .msg_type(MessageType::Signal)
        .sender(CONNMAN_SERVICE)?
        .build())
}

fn owner_rule() -> WcaResult<MatchRule<'static>> {
    Ok(MatchRule::builder()
        .msg_type(MessageType::Signal)
        .sender("org.freedesktop.DBus")?
        .interface("org.freedesktop.DBus")?
        .member("NameOwnerChanged")?
        .add_arg(CONNMAN_SERVICE)?
        .build())
}

/// Forward translated signals until ConnMan leaves the bus or the
/// subscription is dropped. A single stream carries every ConnMan signal,
/// so bus order is preserved end to end.
async fn forward_signals(
    mut signals: MessageStream,
    mut owner: MessageStream,
    tx: mpsc::UnboundedSender<DaemonEvent>,
) {
    debug!("Starting ConnMan signal forwarder");
    loop {
        tokio::select! {
            biased;
            msg = signals.next() => match msg {
                Some(Ok(msg)) => match translate(&msg) {
                    Ok(Some(event)) => {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Skipping malformed ConnMan signal: {}", e),
                },
                Some(Err(e)) => warn!("ConnMan signal stream error: {}", e),
                None => break,
            },
            msg = owner.next() => match msg {
                Some(Ok(msg)) if owner_lost(&msg) => {
                    info!("ConnMan left the bus");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => warn!("NameOwnerChanged stream error: {}", e),
                None => break,
            },
        }
    }
    let _ = tx.send(DaemonEvent::Disconnected);
}

fn owner_lost(msg: &Message) -> bool {
    match msg.body().deserialize::<(String, String, String)>() {
        Ok((name, _old, new)) => name == CONNMAN_SERVICE && new.is_empty(),
        Err(_) => false,
    }
}

/// Map one ConnMan signal onto a daemon event. `Ok(None)` for signals the
/// mirror does not track.
fn translate(msg: &Message) -> WcaResult<Option<DaemonEvent>> {
    let header = msg.header();
    let interface = header.interface().map(|i| i.as_str()).unwrap_or_default();
    let member = header.member().map(|m| m.as_str()).unwrap_or_default();
    let path = header.path().map(|p| ObjectPath::new(p.as_str()));
    let body = msg.body();

    let event = match (interface, member) {
        (MANAGER_INTERFACE, "PropertyChanged") => {
            let (name, value): (String, OwnedValue) = body.deserialize()?;
            DaemonEvent::ManagerPropertyChanged {
                value: convert_value(&name, &value)?,
                name,
            }
        }
        (MANAGER_INTERFACE, "TechnologyAdded") | (MANAGER_INTERFACE, "GroupAdded") => {
            let (path, props): (OwnedObjectPath, HashMap<String, OwnedValue>) =
                body.deserialize()?;
            DaemonEvent::EntityAdded {
                kind: added_kind(member),
                path: to_object_path(&path),
                properties: to_property_map(&props),
            }
        }
        (MANAGER_INTERFACE, "TechnologyRemoved") | (MANAGER_INTERFACE, "GroupRemoved") => {
            let path: OwnedObjectPath = body.deserialize()?;
            DaemonEvent::EntityRemoved {
                kind: added_kind(member),
                path: to_object_path(&path),
            }
        }
        (MANAGER_INTERFACE, "ServicesChanged") | (MANAGER_INTERFACE, "SavedServicesChanged") => {
            let (changed, removed): (ObjectList, Vec<OwnedObjectPath>) = body.deserialize()?;
            DaemonEvent::ServicesChanged {
                kind: if member == "ServicesChanged" {
                    EntityKind::Service
                } else {
                    EntityKind::SavedService
                },
                added: to_entities(changed),
                removed: removed.iter().map(to_object_path).collect(),
            }
        }
        (TECHNOLOGY_INTERFACE, "PropertyChanged")
        | (SERVICE_INTERFACE, "PropertyChanged")
        | (GROUP_INTERFACE, "PropertyChanged") => {
            let path = path.ok_or_else(|| WcaError::Parse("signal without object path".into()))?;
            let (name, value): (String, OwnedValue) = body.deserialize()?;
            DaemonEvent::PropertyChanged {
                kind: match interface {
                    TECHNOLOGY_INTERFACE => EntityKind::Technology,
                    SERVICE_INTERFACE => EntityKind::Service,
                    _ => EntityKind::Group,
                },
                path,
                value: convert_value(&name, &value)?,
                name,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn added_kind(member: &str) -> EntityKind {
    if member.starts_with("Technology") {
        EntityKind::Technology
    } else {
        EntityKind::Group
    }
}

fn convert_value(name: &str, value: &Value<'_>) -> WcaResult<PropertyValue> {
    to_property_value(value)
        .ok_or_else(|| WcaError::Parse(format!("unsupported value for property {name}")))
}

// ── Error mapping ─────────────────────────────────────────────────────

/// Lift access-denied replies into a dedicated error
fn classify(err: zbus::Error) -> WcaError {
    let err_str = err.to_string();
    if err_str.contains("org.freedesktop.DBus.Error.AccessDenied")
        || err_str.contains("net.connman.Error.PermissionDenied")
    {
        WcaError::PermissionDenied(err_str)
    } else {
        WcaError::Dbus(err)
    }
}

/// Saved services and groups are vendor extensions; a daemon without them
/// primes those kinds as empty.
fn optional_list(result: zbus::Result<ObjectList>, method: &str) -> WcaResult<ObjectList> {
    match result {
        Ok(list) => Ok(list),
        Err(e) if e.to_string().contains("UnknownMethod") => {
            debug!("ConnMan has no {}; treating as empty", method);
            Ok(Vec::new())
        }
        Err(e) => Err(classify(e)),
    }
}
