use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use color_eyre::eyre::{bail, eyre, Result};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use wca_support::config::{self, CliArgs, Command, Config, Toggle};
use wca_support::{
    acceptance_code, completion, Backend, Completion, ConnmanDaemon, ObjectPath, PropertyMap,
    PropertyValue, SyncState, UpdateCallbacks, UserStatusRequest, WcaResult, API_VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse();

    if cli.print_default_config {
        print!("{}", config::default_config_toml());
        return Ok(());
    }

    color_eyre::install()?;
    let config = config::load(&cli)?;
    let _guard = init_logging(&config);

    info!("wca-support starting");

    let daemon = match ConnmanDaemon::system().await {
        Ok(daemon) => daemon,
        Err(e) => {
            eprintln!("Failed to connect to the system D-Bus: {}", e);
            std::process::exit(1);
        }
    };
    if !daemon.is_running().await {
        eprintln!("ConnMan is not running.");
        eprintln!("Start it with: sudo systemctl start connman");
        std::process::exit(1);
    }

    let command = cli.command.clone().unwrap_or(Command::Monitor { json: false });
    let json = matches!(command, Command::Monitor { json: true });
    let mut backend = Backend::new(daemon, config.backend_config());

    let (init_done, init_result) = signal();
    backend.init(
        config.service_handles(),
        Arc::new(Printer { json }),
        API_VERSION,
        init_done,
    )?;
    if !init_result.await.unwrap_or(false) {
        backend.release();
        bail!("initialization failed; see the log for details");
    }
    info!("Mirror synchronized");

    let outcome = match command {
        Command::Monitor { .. } => monitor(&backend).await,
        Command::Tethering { action } => {
            run_operation(&backend, "tethering", |b, done| match action {
                Toggle::Enable => b.tether_enable(done),
                Toggle::Disable => b.tether_disable(done),
            })
            .await
        }
        Command::CountryCode { .. } => {
            run_operation(&backend, "country code", |b, done| b.configure_country_code(done)).await
        }
        Command::Wol { action } => {
            run_operation(&backend, "wake-on-LAN", |b, done| match action {
                Toggle::Enable => b.wol_enable(done),
                Toggle::Disable => b.wol_disable(done),
            })
            .await
        }
    };

    backend.release();
    info!("wca-support exiting");
    outcome
}

/// Completion paired with a receiver for its outcome
fn signal() -> (Completion, oneshot::Receiver<bool>) {
    let (tx, rx) = oneshot::channel();
    let done = completion(move |success| {
        let _ = tx.send(success);
    });
    (done, rx)
}

async fn monitor(backend: &Backend<ConnmanDaemon>) -> Result<()> {
    let mut state = backend.subscribe_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == SyncState::Unsubscribed {
                    bail!("connection to ConnMan lost");
                }
            }
        }
    }
}

async fn run_operation<F>(backend: &Backend<ConnmanDaemon>, what: &str, start: F) -> Result<()>
where
    F: FnOnce(&Backend<ConnmanDaemon>, Completion) -> WcaResult<()>,
{
    let (done, result) = signal();
    let accepted = start(backend, done);
    if let Err(ref e) = accepted {
        bail!("{} rejected ({}): {}", what, acceptance_code(&accepted), e);
    }
    match result.await {
        Ok(true) => {
            println!("{} applied", what);
            Ok(())
        }
        Ok(false) => Err(eyre!("{} failed", what)),
        Err(_) => Err(eyre!("{} was dropped without completing", what)),
    }
}

/// Initialize tracing to stderr, or to a daily-rolling file when configured
fn init_logging(config: &Config) -> Option<WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    match config.log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "wca-support.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

// ── Event printer ─────────────────────────────────────────────────────

/// Callback table that prints every update to stdout
struct Printer {
    json: bool,
}

impl Printer {
    fn emit(&self, event: &str, detail: serde_json::Value, text: String) {
        let now = Local::now();
        if self.json {
            println!(
                "{}",
                json!({ "at": now.to_rfc3339(), "event": event, "detail": detail })
            );
        } else {
            println!("{} {:<28} {}", now.format("%H:%M:%S%.3f"), event, text);
        }
    }

    fn property(&self, event: &str, path: Option<&ObjectPath>, name: &str, value: &PropertyValue) {
        let text = match path {
            Some(path) => format!("{path} {name}={value}"),
            None => format!("{name}={value}"),
        };
        self.emit(
            event,
            json!({ "path": path, "name": name, "value": value }),
            text,
        );
    }

    fn entity(&self, event: &str, path: &ObjectPath, properties: Option<&PropertyMap>) {
        let text = match properties {
            Some(props) => format!("{path} ({} properties)", props.len()),
            None => path.to_string(),
        };
        self.emit(event, json!({ "path": path, "properties": properties }), text);
    }

    fn list(&self, event: &str, added: &[(ObjectPath, PropertyMap)], removed: &[ObjectPath]) {
        let added_paths: Vec<&ObjectPath> = added.iter().map(|(p, _)| p).collect();
        self.emit(
            event,
            json!({ "added": added_paths, "removed": removed }),
            format!("+{} -{}", added.len(), removed.len()),
        );
    }
}

impl UpdateCallbacks for Printer {
    fn services_changed(&self, added: &[(ObjectPath, PropertyMap)], removed: &[ObjectPath]) {
        self.list("services-changed", added, removed);
    }

    fn service_property_changed(&self, path: &ObjectPath, name: &str, value: &PropertyValue) {
        self.property("service-property-changed", Some(path), name, value);
    }

    fn saved_services_changed(&self, added: &[(ObjectPath, PropertyMap)], removed: &[ObjectPath]) {
        self.list("saved-services-changed", added, removed);
    }

    fn manager_property_changed(&self, name: &str, value: &PropertyValue) {
        self.property("manager-property-changed", None, name, value);
    }

    fn technology_added(&self, path: &ObjectPath, properties: &PropertyMap) {
        self.entity("technology-added", path, Some(properties));
    }

    fn technology_removed(&self, path: &ObjectPath) {
        self.entity("technology-removed", path, None);
    }

    fn technology_property_changed(&self, path: &ObjectPath, name: &str, value: &PropertyValue) {
        self.property("technology-property-changed", Some(path), name, value);
    }

    fn group_added(&self, path: &ObjectPath, properties: &PropertyMap) {
        self.entity("group-added", path, Some(properties));
    }

    fn group_removed(&self, path: &ObjectPath) {
        self.entity("group-removed", path, None);
    }

    fn group_property_changed(&self, path: &ObjectPath, name: &str, value: &PropertyValue) {
        self.property("group-property-changed", Some(path), name, value);
    }

    fn user_status_requested(&self, request: &UserStatusRequest) {
        self.emit(
            "user-status-requested",
            json!({ "reply_token": request.reply_token }),
            request.reply_token.clone(),
        );
    }
}
