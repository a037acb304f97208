// ── Refresh bookkeeping ──
//
// Tracks when each coordinator last completed a cycle so consumers can
// judge how stale the data they read is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use super::DataStore;

/// A polled part of the store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Controllers,
    Doors,
    Cards,
    Events,
}

impl DataStore {
    /// Record that `component` finished a cycle now.
    pub(crate) fn mark_refreshed(&self, component: Component) {
        self.last_refresh.insert(component, Utc::now());
    }

    /// When `component` last completed a cycle, or `None` if it never did.
    pub fn last_refresh(&self, component: Component) -> Option<DateTime<Utc>> {
        self.last_refresh.get(&component).map(|t| *t)
    }

    /// How long ago `component` last completed a cycle.
    pub fn data_age(&self, component: Component) -> Option<chrono::Duration> {
        self.last_refresh(component).map(|t| Utc::now() - t)
    }

    /// Age of the stalest component, or `None` while any has never run.
    pub fn oldest_data_age(&self) -> Option<chrono::Duration> {
        use strum::IntoEnumIterator;

        Component::iter()
            .map(|c| self.data_age(c))
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .max()
    }
}
