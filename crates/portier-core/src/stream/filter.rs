// ── Filter predicates for the event feed ──

use crate::model::Event;

/// Filter predicate for events.
pub enum EventFilter {
    All,
    Controller(u32),
    Door { controller: u32, door: u8 },
    Card(u32),
    /// Only lock/unlock transitions derived from relay state.
    Synthetic,
    Custom(Box<dyn Fn(&Event) -> bool + Send + Sync>),
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::All => true,
            Self::Controller(id) => event.controller == *id,
            Self::Door { controller, door } => {
                event.controller == *controller && event.door == Some(*door)
            }
            Self::Card(card) => event.card == Some(*card),
            Self::Synthetic => event.is_synthetic(),
            Self::Custom(f) => f(event),
        }
    }
}
