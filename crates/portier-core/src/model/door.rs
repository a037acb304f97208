// ── Door state ──

use portier_api::DoorMode;
use serde::{Deserialize, Serialize};

use super::tracked::Tracked;

/// Merged view of one named door.
///
/// `unlocked`, `open` and `button` come from the owning controller's
/// status bitmasks and are always written together. `mode` and `delay`
/// come from the door-control fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorState {
    pub name: String,
    pub controller: u32,
    pub door: u8,
    pub available: bool,
    pub unlocked: Tracked<bool>,
    pub open: Tracked<bool>,
    pub button: Tracked<bool>,
    pub mode: Tracked<DoorMode>,
    /// Unlock delay in seconds.
    pub delay: Tracked<u8>,
}

impl DoorState {
    pub fn new(name: impl Into<String>, controller: u32, door: u8) -> Self {
        Self {
            name: name.into(),
            controller,
            door,
            available: false,
            unlocked: Tracked::Unset,
            open: Tracked::Unset,
            button: Tracked::Unset,
            mode: Tracked::Unset,
            delay: Tracked::Unset,
        }
    }
}
