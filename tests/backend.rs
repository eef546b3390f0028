use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::mpsc::UnboundedSender;

use wca_support::{
    acceptance_code, completion, Backend, BackendConfig, Completion, Daemon, DaemonEvent,
    EntityKind, ObjectPath, OperationKind, OperationSettings, PropertyMap, PropertyValue,
    ServiceHandle, ServiceHandles, Subscription, SyncState, UpdateCallbacks, UserStatusRequest,
    WcaError, WcaResult, API_VERSION,
};

// ── Scripted daemon ───────────────────────────────────────────────────

#[derive(Default)]
struct Script {
    subscribes: AtomicUsize,
    refuse_subscribe: AtomicBool,
    hang_writes: AtomicBool,
    fail_property: Mutex<Option<String>>,
    initial: Mutex<Vec<DaemonEvent>>,
    feed: Mutex<Option<UnboundedSender<DaemonEvent>>>,
    writes: Mutex<Vec<String>>,
}

#[derive(Clone, Default)]
struct ScriptedDaemon(Arc<Script>);

impl ScriptedDaemon {
    fn with_initial(events: Vec<DaemonEvent>) -> Self {
        let daemon = Self::default();
        *daemon.0.initial.lock().unwrap() = events;
        daemon
    }

    fn push(&self, event: DaemonEvent) {
        let feed = self.0.feed.lock().unwrap();
        feed.as_ref().expect("not subscribed").send(event).unwrap();
    }

    /// Close the event stream as if the forwarder died
    fn hang_up(&self) {
        self.0.feed.lock().unwrap().take();
    }

    fn writes(&self) -> Vec<String> {
        self.0.writes.lock().unwrap().clone()
    }

    async fn write(&self, line: String, name: &str) -> WcaResult<()> {
        self.0.writes.lock().unwrap().push(line);
        if self.0.hang_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let failing = self.0.fail_property.lock().unwrap().clone();
        if failing.as_deref() == Some(name) {
            return Err(WcaError::Daemon(format!("{name} refused")));
        }
        Ok(())
    }
}

impl Daemon for ScriptedDaemon {
    async fn subscribe(&self) -> WcaResult<Subscription> {
        self.0.subscribes.fetch_add(1, Ordering::SeqCst);
        if self.0.refuse_subscribe.load(Ordering::SeqCst) {
            return Err(WcaError::Daemon("connman not running".into()));
        }
        let (tx, subscription) = Subscription::channel();
        for event in self.0.initial.lock().unwrap().iter() {
            tx.send(event.clone()).unwrap();
        }
        *self.0.feed.lock().unwrap() = Some(tx);
        Ok(subscription)
    }

    async fn set_manager_property(&self, name: &str, value: &PropertyValue) -> WcaResult<()> {
        self.write(format!("manager {name}={value}"), name).await
    }

    async fn set_technology_property(
        &self,
        path: &ObjectPath,
        name: &str,
        value: &PropertyValue,
    ) -> WcaResult<()> {
        self.write(format!("{path} {name}={value}"), name).await
    }
}

// ── Recording callback table ──────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<String>>,
}

impl Recorder {
    fn record(&self, line: String) {
        self.log.lock().unwrap().push(line);
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }
}

fn paths(added: &[(ObjectPath, PropertyMap)], removed: &[ObjectPath]) -> String {
    let added: Vec<_> = added.iter().map(|(p, _)| p.to_string()).collect();
    let removed: Vec<_> = removed.iter().map(ObjectPath::to_string).collect();
    format!("+[{}] -[{}]", added.join(","), removed.join(","))
}

impl UpdateCallbacks for Recorder {
    fn services_changed(&self, added: &[(ObjectPath, PropertyMap)], removed: &[ObjectPath]) {
        self.record(format!("services {}", paths(added, removed)));
    }

    fn service_property_changed(&self, path: &ObjectPath, name: &str, value: &PropertyValue) {
        self.record(format!("service {path} {name}={value}"));
    }

    fn saved_services_changed(&self, added: &[(ObjectPath, PropertyMap)], removed: &[ObjectPath]) {
        self.record(format!("saved {}", paths(added, removed)));
    }

    fn manager_property_changed(&self, name: &str, value: &PropertyValue) {
        self.record(format!("manager {name}={value}"));
    }

    fn technology_added(&self, path: &ObjectPath, _properties: &PropertyMap) {
        self.record(format!("technology+ {path}"));
    }

    fn technology_removed(&self, path: &ObjectPath) {
        self.record(format!("technology- {path}"));
    }

    fn technology_property_changed(&self, path: &ObjectPath, name: &str, value: &PropertyValue) {
        self.record(format!("technology {path} {name}={value}"));
    }

    fn group_added(&self, path: &ObjectPath, _properties: &PropertyMap) {
        self.record(format!("group+ {path}"));
    }

    fn group_removed(&self, path: &ObjectPath) {
        self.record(format!("group- {path}"));
    }

    fn group_property_changed(&self, path: &ObjectPath, name: &str, value: &PropertyValue) {
        self.record(format!("group {path} {name}={value}"));
    }

    fn user_status_requested(&self, request: &UserStatusRequest) {
        self.record(format!(
            "user-status {} {} {}",
            request.wifi_service, request.connection_manager_service, request.reply_token
        ));
    }
}

// ── Fixtures ──────────────────────────────────────────────────────────

const WIFI: &str = "/net/connman/technology/wifi";
const ETHERNET: &str = "/net/connman/technology/ethernet";

fn props(pairs: &[(&str, PropertyValue)]) -> PropertyMap {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn wifi_props(powered: bool) -> PropertyMap {
    props(&[("Type", "wifi".into()), ("Powered", powered.into())])
}

fn snapshot(kind: EntityKind, entities: Vec<(ObjectPath, PropertyMap)>) -> DaemonEvent {
    DaemonEvent::Snapshot { kind, entities }
}

/// Manager state plus one snapshot per kind, technologies as given
fn priming(technologies: Vec<(ObjectPath, PropertyMap)>) -> Vec<DaemonEvent> {
    vec![
        DaemonEvent::ManagerProperties(props(&[("State", "online".into())])),
        snapshot(EntityKind::Technology, technologies),
        snapshot(
            EntityKind::Service,
            vec![("/net/connman/service/home".into(), PropertyMap::new())],
        ),
        snapshot(EntityKind::SavedService, Vec::new()),
        snapshot(EntityKind::Group, Vec::new()),
    ]
}

fn handles() -> ServiceHandles {
    ServiceHandles {
        wifi: ServiceHandle::new("com.webos.service.wifi"),
        connection_manager: ServiceHandle::new("com.webos.service.connectionmanager"),
    }
}

fn config() -> BackendConfig {
    BackendConfig {
        settings: OperationSettings {
            tethering_identifier: Some("lounge".into()),
            tethering_passphrase: None,
            country_code: Some("de".into()),
        },
        ..BackendConfig::default()
    }
}

/// Completion that records every outcome it sees
fn outcome() -> (Completion, Arc<Mutex<Vec<bool>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (completion(move |ok| sink.lock().unwrap().push(ok)), seen)
}

/// Let every runnable task make progress. The clock is paused, so the
/// sleep only returns once the runtime is otherwise idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn synchronized(
    technologies: Vec<(ObjectPath, PropertyMap)>,
) -> (Backend<ScriptedDaemon>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let mut backend = Backend::new(ScriptedDaemon::with_initial(priming(technologies)), config());
    let (done, seen) = outcome();
    backend
        .init(handles(), recorder.clone(), API_VERSION, done)
        .unwrap();
    settle().await;
    assert_eq!(*seen.lock().unwrap(), vec![true]);
    assert_eq!(backend.state(), SyncState::Synchronized);
    recorder.take();
    (backend, recorder)
}

// ── Session lifecycle ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn init_delivers_initial_snapshot_then_completes() {
    let recorder = Arc::new(Recorder::default());
    let daemon = ScriptedDaemon::with_initial(priming(vec![
        (WIFI.into(), wifi_props(false)),
        (ETHERNET.into(), props(&[("Type", "ethernet".into())])),
    ]));
    let mut backend = Backend::new(daemon, config());
    let (done, seen) = outcome();

    backend.init(handles(), recorder.clone(), API_VERSION, done).unwrap();
    assert_eq!(backend.state(), SyncState::Priming);
    settle().await;

    assert_eq!(*seen.lock().unwrap(), vec![true]);
    assert_eq!(
        recorder.take(),
        vec![
            "manager State=\"online\"",
            "technology+ /net/connman/technology/wifi",
            "technology+ /net/connman/technology/ethernet",
            "services +[/net/connman/service/home] -[]",
            "saved +[] -[]",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn snapshot_entities_take_incremental_updates() {
    let recorder = Arc::new(Recorder::default());
    let daemon = ScriptedDaemon::with_initial(priming(vec![
        (WIFI.into(), wifi_props(false)),
        (ETHERNET.into(), props(&[("Type", "ethernet".into())])),
    ]));
    let mut backend = Backend::new(daemon, config());
    let (done, seen) = outcome();
    backend.init(handles(), recorder.clone(), API_VERSION, done).unwrap();

    backend.daemon().push(DaemonEvent::PropertyChanged {
        kind: EntityKind::Technology,
        path: WIFI.into(),
        name: "Powered".into(),
        value: true.into(),
    });
    backend.daemon().push(DaemonEvent::EntityRemoved {
        kind: EntityKind::Technology,
        path: ETHERNET.into(),
    });
    settle().await;

    assert_eq!(*seen.lock().unwrap(), vec![true]);
    assert_eq!(
        recorder.take(),
        vec![
            "manager State=\"online\"",
            "technology+ /net/connman/technology/wifi",
            "technology+ /net/connman/technology/ethernet",
            "services +[/net/connman/service/home] -[]",
            "saved +[] -[]",
            "technology /net/connman/technology/wifi Powered=true",
            "technology- /net/connman/technology/ethernet",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn incremental_events_arrive_in_daemon_order() {
    let (backend, recorder) = synchronized(Vec::new()).await;
    let daemon = backend.daemon();

    daemon.push(DaemonEvent::EntityAdded {
        kind: EntityKind::Technology,
        path: WIFI.into(),
        properties: wifi_props(false),
    });
    daemon.push(DaemonEvent::EntityAdded {
        kind: EntityKind::Technology,
        path: ETHERNET.into(),
        properties: PropertyMap::new(),
    });
    daemon.push(DaemonEvent::PropertyChanged {
        kind: EntityKind::Technology,
        path: WIFI.into(),
        name: "Powered".into(),
        value: true.into(),
    });
    daemon.push(DaemonEvent::EntityRemoved {
        kind: EntityKind::Technology,
        path: ETHERNET.into(),
    });
    settle().await;

    assert_eq!(
        recorder.take(),
        vec![
            "technology+ /net/connman/technology/wifi",
            "technology+ /net/connman/technology/ethernet",
            "technology /net/connman/technology/wifi Powered=true",
            "technology- /net/connman/technology/ethernet",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn second_init_is_refused_and_leaves_session_alone() {
    let (mut backend, _recorder) = synchronized(vec![(WIFI.into(), wifi_props(true))]).await;
    let (done, seen) = outcome();

    let result = backend.init(handles(), Arc::new(Recorder::default()), API_VERSION, done);
    assert!(matches!(result, Err(WcaError::AlreadyInitialized)));
    assert_eq!(acceptance_code(&result), -libc::EALREADY);
    settle().await;

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(backend.state(), SyncState::Synchronized);
    assert_eq!(backend.daemon().0.subscribes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn version_mismatch_fails_without_touching_the_daemon() {
    let mut backend = Backend::new(ScriptedDaemon::default(), config());
    let (done, seen) = outcome();

    backend
        .init(handles(), Arc::new(Recorder::default()), API_VERSION + 1, done)
        .unwrap();
    settle().await;

    assert_eq!(*seen.lock().unwrap(), vec![false]);
    assert!(!backend.is_initialized());
    assert_eq!(backend.daemon().0.subscribes.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_handle_fails_init() {
    let mut backend = Backend::new(ScriptedDaemon::default(), config());
    let (done, seen) = outcome();
    let handles = ServiceHandles {
        wifi: ServiceHandle::new(""),
        ..handles()
    };

    backend.init(handles, Arc::new(Recorder::default()), API_VERSION, done).unwrap();
    settle().await;

    assert_eq!(*seen.lock().unwrap(), vec![false]);
    assert!(!backend.is_initialized());
}

#[tokio::test(start_paused = true)]
async fn refused_subscription_fails_init() {
    let daemon = ScriptedDaemon::default();
    daemon.0.refuse_subscribe.store(true, Ordering::SeqCst);
    let mut backend = Backend::new(daemon, config());
    let (done, seen) = outcome();

    backend.init(handles(), Arc::new(Recorder::default()), API_VERSION, done).unwrap();
    settle().await;

    assert_eq!(*seen.lock().unwrap(), vec![false]);
    assert_eq!(backend.state(), SyncState::Unsubscribed);
    // The dead session still has to be released before the next init
    let (again, _) = outcome();
    let result = backend.init(handles(), Arc::new(Recorder::default()), API_VERSION, again);
    assert!(matches!(result, Err(WcaError::AlreadyInitialized)));
}

#[tokio::test(start_paused = true)]
async fn incomplete_snapshot_times_out() {
    let mut events = priming(Vec::new());
    events.pop();
    let mut backend = Backend::new(ScriptedDaemon::with_initial(events), config());
    let (done, seen) = outcome();

    backend.init(handles(), Arc::new(Recorder::default()), API_VERSION, done).unwrap();
    settle().await;
    assert!(seen.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(*seen.lock().unwrap(), vec![false]);
    assert_eq!(backend.state(), SyncState::Unsubscribed);
}

#[tokio::test(start_paused = true)]
async fn release_then_init_again() {
    let (mut backend, _recorder) = synchronized(Vec::new()).await;

    backend.release();
    assert_eq!(backend.state(), SyncState::Unsubscribed);
    assert!(!backend.is_initialized());
    backend.release();

    let recorder = Arc::new(Recorder::default());
    let (done, seen) = outcome();
    backend.init(handles(), recorder.clone(), API_VERSION, done).unwrap();
    settle().await;
    assert_eq!(*seen.lock().unwrap(), vec![true]);
    assert_eq!(backend.daemon().0.subscribes.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn release_during_priming_fails_init() {
    let mut backend = Backend::new(ScriptedDaemon::default(), config());
    let (done, seen) = outcome();

    backend.init(handles(), Arc::new(Recorder::default()), API_VERSION, done).unwrap();
    settle().await;
    backend.release();

    assert_eq!(*seen.lock().unwrap(), vec![false]);
}

// ── Connection loss ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn disconnect_retires_every_entity() {
    let (backend, recorder) = synchronized(vec![(WIFI.into(), wifi_props(true))]).await;
    let daemon = backend.daemon();
    daemon.0.hang_writes.store(true, Ordering::SeqCst);
    daemon.push(DaemonEvent::EntityAdded {
        kind: EntityKind::Group,
        path: "/net/connman/group/p2p".into(),
        properties: PropertyMap::new(),
    });
    let (done, seen) = outcome();
    backend.tether_disable(done).unwrap();
    settle().await;
    recorder.take();

    daemon.push(DaemonEvent::Disconnected);
    settle().await;

    assert_eq!(
        recorder.take(),
        vec![
            "technology- /net/connman/technology/wifi",
            "group- /net/connman/group/p2p",
            "services +[] -[/net/connman/service/home]",
            "manager State=\"offline\"",
        ]
    );
    assert_eq!(*seen.lock().unwrap(), vec![false]);
    assert_eq!(backend.state(), SyncState::Unsubscribed);

    let (done, _) = outcome();
    let result = backend.wol_enable(done);
    assert_eq!(acceptance_code(&result), -libc::ENOTCONN);
}

#[tokio::test(start_paused = true)]
async fn closed_stream_counts_as_disconnect() {
    let (backend, recorder) = synchronized(Vec::new()).await;
    let mut state = backend.subscribe_state();

    backend.daemon().hang_up();
    settle().await;

    assert_eq!(
        recorder.take(),
        vec![
            "services +[] -[/net/connman/service/home]",
            "manager State=\"offline\"",
        ]
    );
    assert!(state.has_changed().unwrap());
    assert_eq!(*state.borrow_and_update(), SyncState::Unsubscribed);
}

// ── Control operations ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn operations_need_a_synchronized_session() {
    let mut backend = Backend::new(ScriptedDaemon::default(), config());
    let (done, seen) = outcome();
    assert_eq!(acceptance_code(&backend.tether_enable(done)), -libc::ENOTCONN);

    let (init_done, _) = outcome();
    backend
        .init(handles(), Arc::new(Recorder::default()), API_VERSION, init_done)
        .unwrap();
    settle().await;
    let (done, _) = outcome();
    assert!(matches!(backend.tether_enable(done), Err(WcaError::NotReady)));
    assert_eq!(
        acceptance_code(&Err(WcaError::NotReady)),
        -libc::EAGAIN
    );

    backend.release();
    let (done, _) = outcome();
    assert_eq!(acceptance_code(&backend.wol_disable(done)), -libc::ENOTCONN);
    settle().await;
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn tether_enable_runs_its_plan() {
    let (backend, _recorder) = synchronized(vec![(WIFI.into(), wifi_props(false))]).await;
    let (done, seen) = outcome();

    assert_eq!(acceptance_code(&backend.tether_enable(done)), 0);
    let (again, again_seen) = outcome();
    let second = backend.tether_enable(again);
    assert_eq!(acceptance_code(&second), -libc::EBUSY);
    settle().await;

    assert_eq!(*seen.lock().unwrap(), vec![true]);
    assert!(again_seen.lock().unwrap().is_empty());
    assert_eq!(
        backend.daemon().writes(),
        vec![
            "/net/connman/technology/wifi Powered=true",
            "/net/connman/technology/wifi TetheringIdentifier=\"lounge\"",
            "/net/connman/technology/wifi Tethering=true",
        ]
    );
    assert!(backend.pending_operations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn different_kinds_run_side_by_side() {
    let (backend, _recorder) = synchronized(vec![(WIFI.into(), wifi_props(true))]).await;
    backend.daemon().0.hang_writes.store(true, Ordering::SeqCst);

    let (tether, _) = outcome();
    let (country, _) = outcome();
    backend.tether_disable(tether).unwrap();
    backend.configure_country_code(country).unwrap();
    settle().await;

    let kinds: Vec<_> = backend.pending_operations().into_iter().map(|(k, _)| k).collect();
    assert_eq!(kinds, vec![OperationKind::TetherDisable, OperationKind::CountryCode]);
    assert_eq!(
        backend.daemon().writes(),
        vec![
            "/net/connman/technology/wifi Tethering=false",
            "/net/connman/technology/wifi CountryCode=\"DE\"",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn release_fails_every_pending_operation() {
    let (mut backend, _recorder) = synchronized(vec![
        (WIFI.into(), wifi_props(true)),
        (ETHERNET.into(), props(&[("Type", "ethernet".into())])),
    ])
    .await;
    backend.daemon().0.hang_writes.store(true, Ordering::SeqCst);

    let (tether, tether_seen) = outcome();
    let (wol, wol_seen) = outcome();
    let (country, country_seen) = outcome();
    backend.tether_enable(tether).unwrap();
    backend.wol_enable(wol).unwrap();
    backend.configure_country_code(country).unwrap();
    settle().await;
    assert_eq!(backend.pending_operations().len(), 3);

    backend.release();

    assert_eq!(*tether_seen.lock().unwrap(), vec![false]);
    assert_eq!(*wol_seen.lock().unwrap(), vec![false]);
    assert_eq!(*country_seen.lock().unwrap(), vec![false]);
    assert!(backend.pending_operations().is_empty());

    settle().await;
    assert_eq!(tether_seen.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nothing_fires_after_release_returns() {
    for _ in 0..50 {
        let recorder = Arc::new(Recorder::default());
        let daemon = ScriptedDaemon::with_initial(priming(vec![(WIFI.into(), wifi_props(false))]));
        let mut backend = Backend::new(daemon, config());
        let (ready_tx, ready) = tokio::sync::oneshot::channel();
        let ready_done = completion(move |ok| {
            let _ = ready_tx.send(ok);
        });
        backend.init(handles(), recorder.clone(), API_VERSION, ready_done).unwrap();
        assert!(ready.await.unwrap());

        let (done, seen) = outcome();
        backend.wol_enable(done).unwrap();
        backend.daemon().push(DaemonEvent::PropertyChanged {
            kind: EntityKind::Technology,
            path: WIFI.into(),
            name: "Powered".into(),
            value: true.into(),
        });
        tokio::task::yield_now().await;

        backend.release();
        let completed = seen.lock().unwrap().clone();
        recorder.take();
        assert_eq!(completed.len(), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(*seen.lock().unwrap(), completed);
        assert!(recorder.take().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn unresponsive_daemon_hits_the_deadline() {
    let (backend, _recorder) = synchronized(vec![(WIFI.into(), wifi_props(true))]).await;
    backend.daemon().0.hang_writes.store(true, Ordering::SeqCst);
    let (done, seen) = outcome();

    backend.wol_disable(done).unwrap();
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(seen.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(*seen.lock().unwrap(), vec![false]);
    assert!(backend.pending_operations().is_empty());

    // The kind is free again
    let (again, _) = outcome();
    assert_eq!(acceptance_code(&backend.wol_disable(again)), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_step_fails_the_operation() {
    let (backend, _recorder) = synchronized(vec![(WIFI.into(), wifi_props(false))]).await;
    *backend.daemon().0.fail_property.lock().unwrap() = Some("Powered".into());
    let (done, seen) = outcome();

    backend.tether_enable(done).unwrap();
    settle().await;

    assert_eq!(*seen.lock().unwrap(), vec![false]);
    assert_eq!(
        backend.daemon().writes(),
        vec!["/net/connman/technology/wifi Powered=true"]
    );
}

#[tokio::test(start_paused = true)]
async fn missing_technology_is_rejected() {
    let (backend, _recorder) = synchronized(Vec::new()).await;

    let (done, _) = outcome();
    assert_eq!(acceptance_code(&backend.tether_enable(done)), -libc::ENODEV);
    let (done, _) = outcome();
    assert_eq!(acceptance_code(&backend.wol_enable(done)), -libc::ENODEV);
}

#[tokio::test(start_paused = true)]
async fn bad_country_code_is_rejected() {
    let recorder = Arc::new(Recorder::default());
    let mut config = config();
    config.settings.country_code = Some("Germany".into());
    let daemon = ScriptedDaemon::with_initial(priming(vec![(WIFI.into(), wifi_props(true))]));
    let mut backend = Backend::new(daemon, config);
    let (init_done, _) = outcome();
    backend.init(handles(), recorder, API_VERSION, init_done).unwrap();
    settle().await;

    let (done, _) = outcome();
    assert_eq!(acceptance_code(&backend.configure_country_code(done)), -libc::EINVAL);
    assert!(backend.daemon().writes().is_empty());
}

// ── User status ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn user_status_request_reaches_the_subscriber() {
    let mut backend = Backend::new(ScriptedDaemon::default(), config());
    assert!(matches!(
        backend.notify_user_status_request("t-1"),
        Err(WcaError::NotInitialized)
    ));

    let recorder = Arc::new(Recorder::default());
    let (done, _) = outcome();
    backend.init(handles(), recorder.clone(), API_VERSION, done).unwrap();
    backend.notify_user_status_request("t-2").unwrap();

    assert_eq!(
        recorder.take(),
        vec!["user-status com.webos.service.wifi com.webos.service.connectionmanager t-2"]
    );
}
