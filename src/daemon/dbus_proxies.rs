// D-Bus proxy trait definitions for ConnMan interfaces.
// These use zbus's #[proxy] macro to auto-generate typed async clients.
// Signals are not declared here: the forwarder reads them from one raw
// message stream so bus order is kept across interfaces.

use std::collections::HashMap;
use zbus::proxy;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};

/// `(path, properties)` pairs returned by the Manager getters
pub type ObjectList = Vec<(OwnedObjectPath, HashMap<String, OwnedValue>)>;

pub const CONNMAN_SERVICE: &str = "net.connman";
pub const MANAGER_INTERFACE: &str = "net.connman.Manager";
pub const TECHNOLOGY_INTERFACE: &str = "net.connman.Technology";
pub const SERVICE_INTERFACE: &str = "net.connman.Service";
pub const GROUP_INTERFACE: &str = "net.connman.Group";

// ── Manager Interface ─────────────────────────────────────────────────

#[proxy(
    interface = "net.connman.Manager",
    default_service = "net.connman",
    default_path = "/"
)]
pub trait Manager {
    /// Global manager properties (State, OfflineMode, ...)
    fn get_properties(&self) -> zbus::Result<HashMap<String, OwnedValue>>;

    /// Change a global manager property
    fn set_property(&self, name: &str, value: &Value<'_>) -> zbus::Result<()>;

    /// All technologies with their properties
    fn get_technologies(&self) -> zbus::Result<ObjectList>;

    /// All services, sorted by the daemon's preference
    fn get_services(&self) -> zbus::Result<ObjectList>;

    /// Services with stored credentials
    fn get_saved_services(&self) -> zbus::Result<ObjectList>;

    /// Peer-to-peer / tethering groups
    fn get_groups(&self) -> zbus::Result<ObjectList>;
}

// ── Technology Interface ──────────────────────────────────────────────

#[proxy(interface = "net.connman.Technology", default_service = "net.connman")]
pub trait Technology {
    /// Change a technology property (Powered, Tethering, CountryCode, ...)
    fn set_property(&self, name: &str, value: &Value<'_>) -> zbus::Result<()>;
}
