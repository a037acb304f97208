// ── Runtime registry configuration ──
//
// These types describe *which* controllers, doors and cards the engine
// manages and how often it polls them. They never touch disk: the
// portier-config crate (or an embedding application) builds a
// `RegistryConfig` and hands it in.

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use portier_api::{DEFAULT_TIMEOUT, Protocol};

/// How to reach one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Controller serial number.
    pub id: u32,
    /// Unicast address. `None` falls back to UDP broadcast.
    pub address: Option<SocketAddrV4>,
    pub protocol: Protocol,
    /// Per-request timeout. `None` uses [`RegistryConfig::default_timeout`].
    pub timeout: Option<Duration>,
}

impl ControllerConfig {
    /// A broadcast-addressed controller with default settings.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            address: None,
            protocol: Protocol::Udp,
            timeout: None,
        }
    }
}

/// A named door: relay `door` (1-4) on `controller`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorConfig {
    pub name: String,
    pub controller: u32,
    pub door: u8,
}

/// Period of each coordinator's background cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub controllers: Duration,
    pub doors: Duration,
    pub cards: Duration,
    pub events: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        let period = Duration::from_secs(30);
        Self {
            controllers: period,
            doors: period,
            cards: period,
            events: period,
        }
    }
}

/// Upper bound on one cycle of each coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTimeouts {
    pub controllers: Duration,
    pub doors: Duration,
    pub cards: Duration,
    pub events: Duration,
}

impl Default for CycleTimeouts {
    fn default() -> Self {
        Self {
            controllers: Duration::from_secs(5),
            doors: Duration::from_millis(2500),
            cards: Duration::from_millis(2500),
            events: Duration::from_secs(5),
        }
    }
}

/// Everything the [`Registry`](crate::Registry) needs to run.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub controllers: Vec<ControllerConfig>,
    pub doors: Vec<DoorConfig>,
    /// Card numbers tracked from startup.
    pub cards: Vec<u32>,
    pub intervals: PollIntervals,
    pub timeouts: CycleTimeouts,
    /// Request timeout for controllers without their own.
    pub default_timeout: Duration,
    /// Local endpoint of the passive event listener. `None` disables it.
    pub listen: Option<SocketAddr>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            controllers: Vec::new(),
            doors: Vec::new(),
            cards: Vec::new(),
            intervals: PollIntervals::default(),
            timeouts: CycleTimeouts::default(),
            default_timeout: DEFAULT_TIMEOUT,
            listen: None,
        }
    }
}
