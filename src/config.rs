use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, WrapErr};
use serde::Deserialize;
use tracing::info;

use crate::backend::{BackendConfig, ServiceHandle, ServiceHandles};
use crate::operations::OperationSettings;

// ─── Embedded Default ────────────────────────────────────────────────────
/// Baked into the binary at compile time; always available as the base layer.
const DEFAULT_CONFIG_TOML: &str = include_str!("../default_config.toml");

// ─── CLI Arguments (override layer) ─────────────────────────────────────
/// wca-support: ConnMan support backend for the Wi-Fi and connection-manager services
#[derive(Parser, Debug, Clone)]
#[command(name = "wca-support", version, about, long_about = None)]
pub struct CliArgs {
    /// Log level filter (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Path to a custom config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the default config to stdout and exit
    #[arg(long)]
    pub print_default_config: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Mirror the connection manager and print every update until Ctrl-C
    Monitor {
        /// One JSON object per line instead of text
        #[arg(long)]
        json: bool,
    },
    /// Turn Wi-Fi tethering on or off
    Tethering {
        #[arg(value_enum)]
        action: Toggle,
    },
    /// Apply a regulatory country code to the Wi-Fi technology
    CountryCode {
        /// Two-letter code (overrides config file)
        code: Option<String>,
    },
    /// Turn wake-on-LAN / wake-on-WLAN on or off
    Wol {
        #[arg(value_enum)]
        action: Toggle,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Enable,
    Disable,
}

// ─── TOML Structs ───────────────────────────────────────────────────────

/// Root configuration, parsed from TOML and then overridden by CLI flags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub tethering: TetheringConfig,
    #[serde(default)]
    pub wifi: WifiConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level
    pub log_level: String,

    /// Directory for daily log files (empty = log to stderr)
    pub log_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    /// Bus name of the Wi-Fi service
    pub wifi_service: String,

    /// Bus name of the connection-manager service
    pub connection_manager_service: String,

    /// Subscribe + initial snapshot deadline (seconds)
    pub init_timeout_secs: u64,

    /// Deadline for each control operation (seconds)
    pub operation_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TetheringConfig {
    /// SSID of the access point (empty = keep the daemon's)
    pub identifier: String,

    /// WPA passphrase (empty = keep the daemon's)
    pub passphrase: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    /// ISO 3166-1 alpha-2 regulatory domain (empty = unset)
    pub country_code: String,
}

// ─── Defaults ───────────────────────────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_dir: String::new(),
        }
    }
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            wifi_service: "com.webos.service.wifi".into(),
            connection_manager_service: "com.webos.service.connectionmanager".into(),
            init_timeout_secs: 10,
            operation_timeout_secs: 30,
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

// ─── Path Resolution ────────────────────────────────────────────────────

impl Config {
    /// Standard config file path: ~/.config/wca-support/config.toml
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wca-support")
            .join("config.toml")
    }

    /// Configured log directory, if any
    pub fn log_dir(&self) -> Option<PathBuf> {
        non_empty(&self.general.log_dir).map(PathBuf::from)
    }

    pub fn service_handles(&self) -> ServiceHandles {
        ServiceHandles {
            wifi: ServiceHandle::new(self.backend.wifi_service.trim()),
            connection_manager: ServiceHandle::new(self.backend.connection_manager_service.trim()),
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            init_timeout: Duration::from_secs(self.backend.init_timeout_secs.max(1)),
            operation_timeout: Duration::from_secs(self.backend.operation_timeout_secs.max(1)),
            settings: OperationSettings {
                tethering_identifier: non_empty(&self.tethering.identifier),
                tethering_passphrase: non_empty(&self.tethering.passphrase),
                country_code: non_empty(&self.wifi.country_code),
            },
        }
    }
}

// ─── Bootloader ─────────────────────────────────────────────────────────

/// The single entry point for configuration. Called exactly once at startup.
///
/// 1. Resolve config file path (CLI override or default)
/// 2. If config file doesn't exist, create directory tree + write defaults
/// 3. Parse TOML from disk into Config
/// 4. Apply CLI overrides on top
pub fn load(cli: &CliArgs) -> Result<Config> {
    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);

    // Bootstrap: ensure the file exists on disk
    if !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).wrap_err_with(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&config_path, DEFAULT_CONFIG_TOML).wrap_err_with(|| {
            format!(
                "Failed to write default config to {}",
                config_path.display()
            )
        })?;
        info!("Created default config at {}", config_path.display());
    }

    let toml_str = std::fs::read_to_string(&config_path)
        .wrap_err_with(|| format!("Failed to read config from {}", config_path.display()))?;

    let mut config = parse(&toml_str).wrap_err_with(|| {
        format!(
            "Failed to parse config at {}.\n\
             Delete the file to regenerate defaults, or run:\n  \
             wca-support --print-default-config > {:?}",
            config_path.display(),
            config_path
        )
    })?;

    // ── CLI overrides ───────────────────────────────────────────────
    if let Some(ref level) = cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(Command::CountryCode { code: Some(ref code) }) = cli.command {
        config.wifi.country_code = code.clone();
    }

    Ok(config)
}

pub fn parse(toml_str: &str) -> Result<Config> {
    Ok(toml::from_str(toml_str)?)
}

/// Returns the embedded default config TOML string.
pub fn default_config_toml() -> &'static str {
    DEFAULT_CONFIG_TOML
}
