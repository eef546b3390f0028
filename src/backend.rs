//! Session lifecycle: `init`, `release` and the control entry points.
//!
//! A [`Backend`] owns at most one session at a time. The session's pump
//! task consumes the daemon subscription, folds every event through the
//! [`Synchronizer`] and delivers the resulting notifications to the
//! registered callback table. Control operations are planned against the
//! mirror and run as independent tasks tracked by the [`Dispatcher`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use zbus::names::WellKnownName;

use crate::callbacks::{Completion, UpdateCallbacks, UserStatusRequest};
use crate::daemon::{Daemon, DaemonEvent};
use crate::error::{WcaError, WcaResult};
use crate::operations::{self, Dispatcher, OperationKind, OperationSettings};
use crate::sync::{SyncState, Synchronizer, Transition};
use crate::version;

/// Transport handle of one consuming service: its well-known bus name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle(String);

impl ServiceHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    fn validate(&self) -> WcaResult<()> {
        WellKnownName::try_from(self.0.as_str())
            .map(|_| ())
            .map_err(|e| WcaError::InvalidHandle(format!("{}: {}", self.0, e)))
    }
}

/// Handles of the two services the backend reports to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandles {
    pub wifi: ServiceHandle,
    pub connection_manager: ServiceHandle,
}

impl ServiceHandles {
    fn validate(&self) -> WcaResult<()> {
        self.wifi.validate()?;
        self.connection_manager.validate()
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Bound on subscribing plus delivering the initial snapshot
    pub init_timeout: Duration,
    /// Bound on each control operation
    pub operation_timeout: Duration,
    pub settings: OperationSettings,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(30),
            settings: OperationSettings::default(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the backend, the pump task and operation tasks
struct Shared {
    handles: ServiceHandles,
    callbacks: Arc<dyn UpdateCallbacks>,
    sync: Arc<Mutex<Synchronizer>>,
    dispatcher: Mutex<Dispatcher>,
    init_completion: Mutex<Option<Completion>>,
    forwarder: Mutex<Option<AbortHandle>>,
    /// Held while callbacks of the table run
    delivery: Mutex<()>,
    /// Held while an operation completion runs
    resolution: Mutex<()>,
    /// Set by `release`; nothing is delivered afterwards
    closed: AtomicBool,
    /// The daemon connection is gone or never came up
    dead: AtomicBool,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run `f` on the synchronizer unless the session was released
    fn with_sync<R>(&self, f: impl FnOnce(&mut Synchronizer) -> R) -> Option<R> {
        let mut sync = lock(&self.sync);
        if self.is_closed() {
            return None;
        }
        Some(f(&mut sync))
    }

    fn complete_init(&self, success: bool) {
        let _delivery = lock(&self.delivery);
        let completion = lock(&self.init_completion).take();
        if let Some(completion) = completion {
            info!("Initialization finished: success={}", success);
            completion(success);
        }
    }

    fn fail_pending(&self) {
        let _resolution = lock(&self.resolution);
        let pending = lock(&self.dispatcher).drain();
        if !pending.is_empty() {
            info!("Cancelling {} pending operations", pending.len());
        }
        for op in pending {
            op.resolve(false);
        }
    }

    /// Complete operation `id` unless it was already failed or superseded.
    /// Completions must not call back into `release`.
    fn finish_operation(&self, kind: OperationKind, id: u64, success: bool) {
        let _resolution = lock(&self.resolution);
        let op = lock(&self.dispatcher).take(kind, id);
        if let Some(op) = op {
            op.resolve(success);
        }
    }

    /// Session could not be established
    fn abandon(&self) {
        self.dead.store(true, Ordering::SeqCst);
        self.with_sync(Synchronizer::finish);
        self.complete_init(false);
    }

    /// Apply one event and deliver its notifications. Returns `false` once
    /// the session has ended.
    fn dispatch(&self, event: DaemonEvent) -> bool {
        let Some((notes, transition)) = self.with_sync(|sync| sync.apply(event)) else {
            return false;
        };
        {
            let _delivery = lock(&self.delivery);
            for note in &notes {
                if self.is_closed() {
                    return false;
                }
                note.deliver(self.callbacks.as_ref());
            }
        }

        match transition {
            Transition::None => true,
            Transition::Synchronized => {
                self.complete_init(true);
                true
            }
            Transition::Lost { was_synchronized } => {
                if !was_synchronized {
                    self.complete_init(false);
                }
                self.fail_pending();
                self.dead.store(true, Ordering::SeqCst);
                self.with_sync(Synchronizer::finish);
                false
            }
        }
    }
}

struct Session {
    shared: Arc<Shared>,
    pump: JoinHandle<()>,
}

/// Pump the daemon subscription into the synchronizer until the connection
/// ends or the session is released.
async fn run_session<D: Daemon>(daemon: Arc<D>, shared: Arc<Shared>, init_timeout: Duration) {
    let deadline = Instant::now() + init_timeout;
    let mut subscription = match timeout_at(deadline, daemon.subscribe()).await {
        Ok(Ok(subscription)) => subscription,
        Ok(Err(e)) => {
            warn!("Daemon subscription failed: {}", e);
            shared.abandon();
            return;
        }
        Err(_) => {
            warn!("Daemon subscription timed out after {:?}", init_timeout);
            shared.abandon();
            return;
        }
    };
    *lock(&shared.forwarder) = subscription.abort_handle();
    debug!("Subscribed; priming mirror");

    loop {
        let priming = shared.with_sync(|sync| sync.state() == SyncState::Priming);
        let event = match priming {
            None => return,
            Some(true) => match timeout_at(deadline, subscription.next()).await {
                Ok(event) => event,
                Err(_) => {
                    warn!("Initial snapshot not complete after {:?}", init_timeout);
                    None
                }
            },
            Some(false) => subscription.next().await,
        };
        let event = event.unwrap_or(DaemonEvent::Disconnected);
        if !shared.dispatch(event) {
            break;
        }
    }
    debug!("Session pump finished");
}

/// Backend for one subscriber over a connection-manager daemon.
///
/// All methods must be called from within a Tokio runtime.
pub struct Backend<D: Daemon> {
    daemon: Arc<D>,
    config: BackendConfig,
    sync: Arc<Mutex<Synchronizer>>,
    state: watch::Receiver<SyncState>,
    session: Option<Session>,
}

impl<D: Daemon> Backend<D> {
    pub fn new(daemon: D, config: BackendConfig) -> Self {
        let sync = Synchronizer::new();
        let state = sync.watch();
        Self {
            daemon: Arc::new(daemon),
            config,
            sync: Arc::new(Mutex::new(sync)),
            state,
            session: None,
        }
    }

    pub fn daemon(&self) -> &D {
        &self.daemon
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    /// Register `callbacks` under `handles` and start mirroring the daemon.
    ///
    /// `completion` fires once: `true` when the initial snapshot has been
    /// delivered, `false` if the version or handles are rejected or the
    /// daemon cannot be reached. A second `init` without `release` is
    /// refused with [`WcaError::AlreadyInitialized`] and its completion is
    /// dropped without being called.
    pub fn init(
        &mut self,
        handles: ServiceHandles,
        callbacks: Arc<dyn UpdateCallbacks>,
        api_version: u32,
        completion: Completion,
    ) -> WcaResult<()> {
        if self.session.is_some() {
            warn!("init called while a session is active");
            return Err(WcaError::AlreadyInitialized);
        }
        if let Err(e) = version::check(api_version).and_then(|_| handles.validate()) {
            warn!("init rejected: {}", e);
            tokio::spawn(async move { completion(false) });
            return Ok(());
        }

        info!(
            "Initializing for {} and {}",
            handles.wifi.name(),
            handles.connection_manager.name()
        );
        lock(&self.sync).begin();
        let shared = Arc::new(Shared {
            handles,
            callbacks,
            sync: Arc::clone(&self.sync),
            dispatcher: Mutex::new(Dispatcher::new()),
            init_completion: Mutex::new(Some(completion)),
            forwarder: Mutex::new(None),
            delivery: Mutex::new(()),
            resolution: Mutex::new(()),
            closed: AtomicBool::new(false),
            dead: AtomicBool::new(false),
        });
        let pump = tokio::spawn(run_session(
            Arc::clone(&self.daemon),
            Arc::clone(&shared),
            self.config.init_timeout,
        ));
        self.session = Some(Session { shared, pump });
        Ok(())
    }

    /// Tear the session down. Every pending operation, and `init`'s own
    /// completion if it has not fired, completes with `false` before this
    /// returns. A callback or completion already running is waited for, and
    /// none starts afterwards. No-op when not initialized.
    pub fn release(&mut self) {
        let Some(session) = self.session.take() else {
            debug!("release called without a session");
            return;
        };
        info!("Releasing session");
        let shared = session.shared;
        shared.closed.store(true, Ordering::SeqCst);
        session.pump.abort();
        if let Some(forwarder) = lock(&shared.forwarder).take() {
            forwarder.abort();
        }
        shared.fail_pending();
        shared.complete_init(false);
        lock(&self.sync).reset();
    }

    fn live_session(&self) -> WcaResult<&Arc<Shared>> {
        match self.session {
            Some(ref session) if !session.shared.dead.load(Ordering::SeqCst) => {
                Ok(&session.shared)
            }
            _ => Err(WcaError::NotInitialized),
        }
    }

    fn submit(&self, kind: OperationKind, completion: Completion) -> WcaResult<()> {
        let shared = Arc::clone(self.live_session()?);
        let steps = {
            let sync = lock(&shared.sync);
            if sync.state() != SyncState::Synchronized {
                return Err(WcaError::NotReady);
            }
            operations::plan(kind, sync.mirror(), &self.config.settings)?
        };

        let id = lock(&shared.dispatcher).accept(kind, completion)?;
        info!("{} accepted (#{}): {} steps", kind, id, steps.len());

        let daemon = Arc::clone(&self.daemon);
        let deadline = self.config.operation_timeout;
        let task_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            let success = operations::run(daemon.as_ref(), kind, &steps, deadline).await;
            task_shared.finish_operation(kind, id, success);
        });
        lock(&shared.dispatcher).attach(kind, id, task.abort_handle());
        Ok(())
    }

    pub fn tether_enable(&self, completion: Completion) -> WcaResult<()> {
        self.submit(OperationKind::TetherEnable, completion)
    }

    pub fn tether_disable(&self, completion: Completion) -> WcaResult<()> {
        self.submit(OperationKind::TetherDisable, completion)
    }

    /// Apply the configured regulatory country code to the wifi technology
    pub fn configure_country_code(&self, completion: Completion) -> WcaResult<()> {
        self.submit(OperationKind::CountryCode, completion)
    }

    pub fn wol_enable(&self, completion: Completion) -> WcaResult<()> {
        self.submit(OperationKind::WolEnable, completion)
    }

    pub fn wol_disable(&self, completion: Completion) -> WcaResult<()> {
        self.submit(OperationKind::WolDisable, completion)
    }

    /// Operations in flight and how long ago each was accepted
    pub fn pending_operations(&self) -> Vec<(OperationKind, Duration)> {
        match self.session {
            Some(ref session) => lock(&session.shared.dispatcher)
                .snapshot()
                .into_iter()
                .map(|(kind, issued_at)| (kind, issued_at.elapsed()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Forward a user status request from the service layer to the
    /// subscriber's callback table.
    pub fn notify_user_status_request(&self, reply_token: &str) -> WcaResult<()> {
        let shared = self
            .session
            .as_ref()
            .map(|session| &session.shared)
            .ok_or(WcaError::NotInitialized)?;
        let request = UserStatusRequest {
            wifi_service: shared.handles.wifi.name().to_string(),
            connection_manager_service: shared.handles.connection_manager.name().to_string(),
            reply_token: reply_token.to_string(),
        };
        debug!("User status request {}", request.reply_token);
        shared.callbacks.user_status_requested(&request);
        Ok(())
    }
}

impl<D: Daemon> Drop for Backend<D> {
    fn drop(&mut self) {
        self.release();
    }
}
