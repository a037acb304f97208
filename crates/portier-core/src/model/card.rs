// ── Card state ──

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::tracked::Tracked;

/// A card merged across every controller that stores it.
///
/// The authoritative records live on the controllers; this view is
/// recomputed from them each cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardState {
    pub card: u32,
    /// `true` when at least one controller holds the card.
    pub available: bool,
    /// Earliest start date across controllers.
    pub start_date: Tracked<NaiveDate>,
    /// Latest end date across controllers.
    pub end_date: Tracked<NaiveDate>,
    /// Names of the doors the card opens, on any controller.
    pub doors: Tracked<BTreeSet<String>>,
    pub pin: Tracked<u32>,
}

impl CardState {
    pub fn new(card: u32) -> Self {
        Self {
            card,
            available: false,
            start_date: Tracked::Unset,
            end_date: Tracked::Unset,
            doors: Tracked::Unset,
            pin: Tracked::Unset,
        }
    }

    /// Whether the card opens `door`.
    pub fn permits(&self, door: &str) -> bool {
        self.doors.get().is_some_and(|doors| doors.contains(door))
    }
}
