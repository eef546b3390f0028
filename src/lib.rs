//! ConnMan support backend for the Wi-Fi and connection-manager services.
//!
//! [`Backend`] mirrors the connection manager's technologies, groups,
//! services and saved services into a subscriber's [`UpdateCallbacks`]
//! table and runs the asynchronous control operations (tethering, country
//! code, wake-on-LAN) against the daemon.

pub mod backend;
pub mod callbacks;
pub mod config;
pub mod daemon;
pub mod error;
pub mod model;
pub mod operations;
pub mod sync;
pub mod version;

pub use backend::{Backend, BackendConfig, ServiceHandle, ServiceHandles};
pub use callbacks::{completion, Completion, NoopCallbacks, UpdateCallbacks, UserStatusRequest};
pub use daemon::{ConnmanDaemon, Daemon, DaemonEvent, Subscription};
pub use error::{acceptance_code, WcaError, WcaResult};
pub use model::{EntityKind, ObjectPath, PropertyMap, PropertyValue};
pub use operations::{OperationKind, OperationSettings};
pub use sync::SyncState;
pub use version::API_VERSION;
