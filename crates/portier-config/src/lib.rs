//! Configuration for the portier registry.
//!
//! A TOML file listing controllers, named doors and tracked cards, layered
//! with `PORTIER_`-prefixed environment overrides, and translated into
//! `portier_core::RegistryConfig`.
//!
//! ```toml
//! listen = "0.0.0.0:60001"
//! cards = [10058400]
//!
//! [intervals]
//! doors = 10
//!
//! [[controllers]]
//! id = 405419896
//! address = "192.168.1.100"
//!
//! [[doors]]
//! name = "Great Hall"
//! controller = 405419896
//! door = 1
//! ```

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use portier_api::{DEFAULT_PORT, DEFAULT_TIMEOUT, Protocol};
use portier_core::{
    ControllerConfig, CoreError, CycleTimeouts, Directory, DoorConfig, PollIntervals,
    RegistryConfig,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("invalid door map: {0}")]
    Doors(#[from] CoreError),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Bind address of the passive event listener. Unset disables it.
    pub listen: Option<String>,

    /// Request timeout in milliseconds for controllers without their own.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Cards tracked from startup.
    #[serde(default)]
    pub cards: Vec<u32>,

    #[serde(default)]
    pub intervals: Intervals,

    #[serde(default)]
    pub cycle_timeouts: CycleTimeoutsMs,

    #[serde(default)]
    pub controllers: Vec<ControllerEntry>,

    #[serde(default)]
    pub doors: Vec<DoorEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: None,
            timeout_ms: default_timeout_ms(),
            cards: Vec::new(),
            intervals: Intervals::default(),
            cycle_timeouts: CycleTimeoutsMs::default(),
            controllers: Vec::new(),
            doors: Vec::new(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    millis(DEFAULT_TIMEOUT)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Poll periods in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Intervals {
    pub controllers: u64,
    pub doors: u64,
    pub cards: u64,
    pub events: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        let defaults = PollIntervals::default();
        Self {
            controllers: defaults.controllers.as_secs(),
            doors: defaults.doors.as_secs(),
            cards: defaults.cards.as_secs(),
            events: defaults.events.as_secs(),
        }
    }
}

/// Cycle bounds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CycleTimeoutsMs {
    pub controllers: u64,
    pub doors: u64,
    pub cards: u64,
    pub events: u64,
}

impl Default for CycleTimeoutsMs {
    fn default() -> Self {
        let defaults = CycleTimeouts::default();
        Self {
            controllers: millis(defaults.controllers),
            doors: millis(defaults.doors),
            cards: millis(defaults.cards),
            events: millis(defaults.events),
        }
    }
}

/// One `[[controllers]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ControllerEntry {
    /// Serial number.
    pub id: u32,

    /// `"ip"` or `"ip:port"`. Unset uses UDP broadcast.
    pub address: Option<String>,

    #[serde(default)]
    pub protocol: Protocol,

    /// Override the request timeout (milliseconds).
    pub timeout_ms: Option<u64>,
}

/// One `[[doors]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DoorEntry {
    pub name: String,
    pub controller: u32,
    /// Relay 1-4.
    pub door: u8,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "portier", "portier").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("portier");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the platform config file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment.
///
/// A missing file leaves the defaults in place. Environment variables use
/// `__` to reach nested keys: `PORTIER_INTERVALS__DOORS=10`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("PORTIER_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load, validate and translate in one step.
pub fn load_registry_config(path: Option<&Path>) -> Result<RegistryConfig, ConfigError> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    config.to_registry_config()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Validate and build the registry configuration.
    ///
    /// Door numbers, duplicate door names and doors on unknown controllers
    /// are checked by the same rules the registry applies at startup.
    pub fn to_registry_config(&self) -> Result<RegistryConfig, ConfigError> {
        let intervals = PollIntervals {
            controllers: seconds("intervals.controllers", self.intervals.controllers)?,
            doors: seconds("intervals.doors", self.intervals.doors)?,
            cards: seconds("intervals.cards", self.intervals.cards)?,
            events: seconds("intervals.events", self.intervals.events)?,
        };
        let timeouts = CycleTimeouts {
            controllers: milliseconds("cycle_timeouts.controllers", self.cycle_timeouts.controllers)?,
            doors: milliseconds("cycle_timeouts.doors", self.cycle_timeouts.doors)?,
            cards: milliseconds("cycle_timeouts.cards", self.cycle_timeouts.cards)?,
            events: milliseconds("cycle_timeouts.events", self.cycle_timeouts.events)?,
        };

        let mut seen = HashSet::new();
        let mut controllers = Vec::with_capacity(self.controllers.len());
        for entry in &self.controllers {
            if entry.id == 0 {
                return Err(invalid("controllers.id", "serial number must be non-zero"));
            }
            if !seen.insert(entry.id) {
                return Err(invalid(
                    "controllers.id",
                    format!("controller {} listed twice", entry.id),
                ));
            }
            controllers.push(entry.to_controller_config()?);
        }

        let listen = self
            .listen
            .as_deref()
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .map_err(|_| invalid("listen", format!("invalid socket address: {addr}")))
            })
            .transpose()?;

        let config = RegistryConfig {
            controllers,
            doors: self
                .doors
                .iter()
                .map(|d| DoorConfig {
                    name: d.name.clone(),
                    controller: d.controller,
                    door: d.door,
                })
                .collect(),
            cards: self.cards.clone(),
            intervals,
            timeouts,
            default_timeout: milliseconds("timeout_ms", self.timeout_ms)?,
            listen,
        };

        Directory::new(&config)?;
        Ok(config)
    }
}

impl ControllerEntry {
    fn to_controller_config(&self) -> Result<ControllerConfig, ConfigError> {
        let address = self
            .address
            .as_deref()
            .map(|addr| parse_address(self.id, addr))
            .transpose()?;
        let timeout = self
            .timeout_ms
            .map(|ms| milliseconds("controllers.timeout_ms", ms))
            .transpose()?;

        Ok(ControllerConfig {
            id: self.id,
            address,
            protocol: self.protocol,
            timeout,
        })
    }
}

/// `"ip:port"`, or a bare `"ip"` on the default controller port.
fn parse_address(id: u32, addr: &str) -> Result<SocketAddrV4, ConfigError> {
    addr.parse::<SocketAddrV4>()
        .or_else(|_| {
            addr.parse::<Ipv4Addr>()
                .map(|ip| SocketAddrV4::new(ip, DEFAULT_PORT))
        })
        .map_err(|_| {
            invalid(
                "controllers.address",
                format!("controller {id}: invalid IPv4 address '{addr}'"),
            )
        })
}

fn seconds(field: &str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(invalid(field, "must be at least 1 second"));
    }
    Ok(Duration::from_secs(value))
}

fn milliseconds(field: &str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(invalid(field, "must be at least 1 millisecond"));
    }
    Ok(Duration::from_millis(value))
}
