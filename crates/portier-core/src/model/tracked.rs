// ── Observed-value cell ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An attribute that is either unknown or was observed at a given instant.
///
/// Failed fetches never write `Unset`: once a value is known it stays
/// until a newer observation replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Tracked<T> {
    Unset,
    Known { value: T, observed: DateTime<Utc> },
}

impl<T> Default for Tracked<T> {
    fn default() -> Self {
        Self::Unset
    }
}

impl<T> Tracked<T> {
    /// A value observed now.
    pub fn new(value: T) -> Self {
        Self::at(value, Utc::now())
    }

    pub fn at(value: T, observed: DateTime<Utc>) -> Self {
        Self::Known { value, observed }
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Unset => None,
            Self::Known { value, .. } => Some(value),
        }
    }

    pub fn observed(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Unset => None,
            Self::Known { observed, .. } => Some(*observed),
        }
    }

    /// Time since the value was observed.
    pub fn age(&self) -> Option<chrono::Duration> {
        self.observed().map(|t| Utc::now() - t)
    }

    /// The value, but only if it was observed within `max_age`.
    pub fn fresh(&self, max_age: chrono::Duration) -> Option<&T> {
        match self {
            Self::Known { value, observed } if Utc::now() - *observed <= max_age => Some(value),
            _ => None,
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Self::Known { .. })
    }

    /// Record a new observation.
    pub fn set(&mut self, value: T) {
        *self = Self::new(value);
    }
}

impl<T: Copy> Tracked<T> {
    pub fn value(&self) -> Option<T> {
        self.get().copied()
    }
}
