//! Asynchronous control operations.
//!
//! Each accepted request becomes a [`PendingOperation`] that resolves
//! exactly once: when its daemon steps finish, when one of them fails, when
//! its deadline expires, or when the session is released. A second request
//! of a kind that is still pending is rejected with `EBUSY`.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::callbacks::Completion;
use crate::daemon::Daemon;
use crate::error::{WcaError, WcaResult};
use crate::model::{Mirror, ObjectPath, PropertyMap, PropertyValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    TetherEnable,
    TetherDisable,
    CountryCode,
    WolEnable,
    WolDisable,
}

impl OperationKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::TetherEnable => "tether-enable",
            Self::TetherDisable => "tether-disable",
            Self::CountryCode => "country-code-configure",
            Self::WolEnable => "wol-enable",
            Self::WolDisable => "wol-disable",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Platform settings the operation plans draw on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationSettings {
    /// SSID announced while tethering
    pub tethering_identifier: Option<String>,
    /// WPA passphrase for the tethering access point
    pub tethering_passphrase: Option<String>,
    /// ISO 3166-1 alpha-2 regulatory domain
    pub country_code: Option<String>,
}

/// One daemon request in an operation plan
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Manager {
        name: String,
        value: PropertyValue,
    },
    Technology {
        path: ObjectPath,
        name: String,
        value: PropertyValue,
    },
}

impl Step {
    fn manager(name: &str, value: impl Into<PropertyValue>) -> Self {
        Self::Manager {
            name: name.to_string(),
            value: value.into(),
        }
    }

    fn technology(path: &ObjectPath, name: &str, value: impl Into<PropertyValue>) -> Self {
        Self::Technology {
            path: path.clone(),
            name: name.to_string(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manager { name, value } => write!(f, "manager {name}={value}"),
            Self::Technology { path, name, value } => write!(f, "{path} {name}={value}"),
        }
    }
}

// ── Planning ──────────────────────────────────────────────────────────

fn wifi(mirror: &Mirror) -> WcaResult<(&ObjectPath, &PropertyMap)> {
    mirror
        .technology("wifi")
        .ok_or_else(|| WcaError::NoDevice("wifi technology not present".into()))
}

fn flag(props: &PropertyMap, name: &str) -> bool {
    props.get(name).and_then(PropertyValue::as_bool).unwrap_or(false)
}

/// Validate an ISO 3166-1 alpha-2 code
pub fn validate_country_code(code: &str) -> WcaResult<String> {
    let code = code.trim();
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(WcaError::InvalidArgument(format!(
            "country code must be two letters, got \"{code}\""
        )))
    }
}

/// Compute the daemon steps implementing `kind` against the current mirror.
/// Errors here are synchronous rejections.
pub fn plan(
    kind: OperationKind,
    mirror: &Mirror,
    settings: &OperationSettings,
) -> WcaResult<Vec<Step>> {
    let mut steps = Vec::new();
    match kind {
        OperationKind::TetherEnable => {
            let (path, props) = wifi(mirror)?;
            if flag(&mirror.manager, "OfflineMode") {
                steps.push(Step::manager("OfflineMode", false));
            }
            if !flag(props, "Powered") {
                steps.push(Step::technology(path, "Powered", true));
            }
            if let Some(ref ssid) = settings.tethering_identifier {
                steps.push(Step::technology(path, "TetheringIdentifier", ssid.as_str()));
            }
            if let Some(ref passphrase) = settings.tethering_passphrase {
                steps.push(Step::technology(path, "TetheringPassphrase", passphrase.as_str()));
            }
            steps.push(Step::technology(path, "Tethering", true));
        }
        OperationKind::TetherDisable => {
            let (path, _) = wifi(mirror)?;
            steps.push(Step::technology(path, "Tethering", false));
        }
        OperationKind::CountryCode => {
            let code = settings
                .country_code
                .as_deref()
                .ok_or_else(|| WcaError::InvalidArgument("no country code configured".into()))
                .and_then(validate_country_code)?;
            let (path, _) = wifi(mirror)?;
            steps.push(Step::technology(path, "CountryCode", code));
        }
        OperationKind::WolEnable | OperationKind::WolDisable => {
            let enable = kind == OperationKind::WolEnable;
            if let Some((path, _)) = mirror.technology("ethernet") {
                steps.push(Step::technology(path, "WakeOnLan", enable));
            }
            if let Some((path, _)) = mirror.technology("wifi") {
                steps.push(Step::technology(path, "WakeOnWlan", enable));
            }
            if steps.is_empty() {
                return Err(WcaError::NoDevice(
                    "no ethernet or wifi technology present".into(),
                ));
            }
        }
    }
    Ok(steps)
}

/// Run the steps in order; the first failure aborts the sequence
pub async fn execute<D: Daemon>(daemon: &D, steps: &[Step]) -> WcaResult<()> {
    for step in steps {
        debug!("Executing step: {}", step);
        match step {
            Step::Manager { name, value } => daemon.set_manager_property(name, value).await?,
            Step::Technology { path, name, value } => {
                daemon.set_technology_property(path, name, value).await?
            }
        }
    }
    Ok(())
}

/// Run a plan under its deadline and report the outcome as a success flag
pub async fn run<D: Daemon>(
    daemon: &D,
    kind: OperationKind,
    steps: &[Step],
    deadline: Duration,
) -> bool {
    match tokio::time::timeout(deadline, execute(daemon, steps)).await {
        Ok(Ok(())) => {
            info!("{} completed", kind);
            true
        }
        Ok(Err(e)) => {
            warn!("{} failed: {}", kind, e);
            false
        }
        Err(_) => {
            warn!("{} timed out after {:?}", kind, deadline);
            false
        }
    }
}

// ── Pending table ─────────────────────────────────────────────────────

/// One in-flight control request
pub struct PendingOperation {
    id: u64,
    kind: OperationKind,
    completion: Completion,
    issued_at: Instant,
    task: Option<AbortHandle>,
}

impl PendingOperation {
    /// Stop the daemon sequence and resolve with `success`
    pub fn resolve(self, success: bool) {
        if let Some(task) = self.task {
            task.abort();
        }
        debug!("{} (#{}) resolved: success={}", self.kind, self.id, success);
        (self.completion)(success);
    }
}

/// Owner of every pending operation of one session
#[derive(Default)]
pub struct Dispatcher {
    pending: HashMap<OperationKind, PendingOperation>,
    next_id: u64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, kind: OperationKind) -> bool {
        self.pending.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Register a request. Rejects a second request of a pending kind.
    pub fn accept(&mut self, kind: OperationKind, completion: Completion) -> WcaResult<u64> {
        if self.is_pending(kind) {
            return Err(WcaError::Busy(kind.to_string()));
        }
        self.next_id += 1;
        let id = self.next_id;
        self.pending.insert(
            kind,
            PendingOperation {
                id,
                kind,
                completion,
                issued_at: Instant::now(),
                task: None,
            },
        );
        Ok(id)
    }

    /// Attach the task running the daemon steps, so cancellation can stop it.
    /// If the operation already resolved, the task is stopped right away.
    pub fn attach(&mut self, kind: OperationKind, id: u64, task: AbortHandle) {
        match self.pending.get_mut(&kind) {
            Some(op) if op.id == id => op.task = Some(task),
            _ => task.abort(),
        }
    }

    /// Take the operation `id` out of the table, if it is still pending.
    /// The caller resolves it outside any lock.
    pub fn take(&mut self, kind: OperationKind, id: u64) -> Option<PendingOperation> {
        match self.pending.get(&kind) {
            Some(op) if op.id == id => self.pending.remove(&kind),
            _ => None,
        }
    }

    /// Remove every pending operation, oldest first
    pub fn drain(&mut self) -> Vec<PendingOperation> {
        let mut ops: Vec<_> = self.pending.drain().map(|(_, op)| op).collect();
        ops.sort_by_key(|op| op.id);
        ops
    }

    /// Kinds in flight with their issuance time
    pub fn snapshot(&self) -> Vec<(OperationKind, Instant)> {
        let mut list: Vec<_> = self.pending.values().map(|op| (op.kind, op.issued_at)).collect();
        list.sort();
        list
    }
}
