// ── Event domain types ──

use std::collections::VecDeque;

use chrono::NaiveDateTime;
use portier_api::{Direction, EventRecord, EventType, Reason};
use serde::{Deserialize, Serialize};

/// Per-entity history depth.
pub const EVENT_BUFFER_CAPACITY: usize = 16;

/// An access-control event, either fetched from a controller's log or
/// synthesized from a relay transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub controller: u32,
    /// Position in the controller's event log. `None` for synthesized events.
    pub index: Option<u32>,
    pub event_type: EventType,
    pub reason: Reason,
    pub card: Option<u32>,
    pub door: Option<u8>,
    pub granted: bool,
    pub direction: Direction,
    pub timestamp: Option<NaiveDateTime>,
}

impl Event {
    /// An event read from `controller`'s log.
    pub fn fetched(controller: u32, record: &EventRecord) -> Self {
        Self {
            controller,
            index: Some(record.index),
            event_type: record.event_type,
            reason: record.reason,
            card: (record.card != 0).then_some(record.card),
            door: (1..=4).contains(&record.door).then_some(record.door),
            granted: record.granted,
            direction: record.direction,
            timestamp: record.timestamp,
        }
    }

    /// A lock/unlock transition observed on a relay.
    pub fn relay(controller: u32, door: u8, unlocked: bool, at: NaiveDateTime) -> Self {
        Self {
            controller,
            index: None,
            event_type: EventType::Door,
            reason: if unlocked {
                Reason::DoorUnlocked
            } else {
                Reason::DoorLocked
            },
            card: None,
            door: Some(door),
            granted: true,
            direction: Direction::In,
            timestamp: Some(at),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.index.is_none()
    }
}

/// Bounded FIFO of events for one entity.
///
/// Pushing onto a full buffer drops the oldest entry.
#[derive(Debug, Clone, Default)]
pub struct EventBuffer {
    events: VecDeque<Event>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self {
            events: VecDeque::with_capacity(EVENT_BUFFER_CAPACITY),
        }
    }

    pub fn push(&mut self, event: Event) {
        if self.events.len() == EVENT_BUFFER_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Take the oldest buffered event.
    pub fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
