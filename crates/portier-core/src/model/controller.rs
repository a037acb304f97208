// ── Controller state ──

use std::net::{Ipv4Addr, SocketAddrV4};

use chrono::NaiveDateTime;
use portier_api::{AntiPassback, Interlock};
use serde::{Deserialize, Serialize};

use super::tracked::Tracked;

/// Last-known configuration and health of one controller.
///
/// Each field is written only by the fetch that produces it, so a slow
/// listener reply never clobbers a fresh clock reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerState {
    pub id: u32,
    /// Set once an identity reply arrives. Failed fetches leave it as is.
    pub available: bool,

    // Identity / network
    pub address: Tracked<Ipv4Addr>,
    pub netmask: Tracked<Ipv4Addr>,
    pub gateway: Tracked<Ipv4Addr>,
    pub mac: Tracked<String>,
    pub firmware: Tracked<String>,

    // Event listener
    pub listener: Tracked<SocketAddrV4>,
    pub listener_interval: Tracked<u8>,

    pub datetime: Tracked<NaiveDateTime>,
    pub interlock: Tracked<Interlock>,
    pub antipassback: Tracked<AntiPassback>,

    /// Number of cards stored on the controller.
    pub cards: Tracked<u32>,
}

impl ControllerState {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            available: false,
            address: Tracked::Unset,
            netmask: Tracked::Unset,
            gateway: Tracked::Unset,
            mac: Tracked::Unset,
            firmware: Tracked::Unset,
            listener: Tracked::Unset,
            listener_interval: Tracked::Unset,
            datetime: Tracked::Unset,
            interlock: Tracked::Unset,
            antipassback: Tracked::Unset,
            cards: Tracked::Unset,
        }
    }
}
