// ── Central reactive data store ──
//
// Thread-safe storage for every controller, door and card the engine
// tracks, plus the per-entity event history buffers. Mutations are
// broadcast to subscribers via `watch` channels.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::collection::EntityCollection;
use super::refresh::Component;
use crate::directory::Directory;
use crate::model::{CardState, ControllerState, DoorState, Event, EventBuffer};
use crate::stream::EntityStream;

/// Central reactive store.
///
/// All reads are wait-free; writes use fine-grained per-shard locks
/// within `DashMap` and are never held across a network call.
pub struct DataStore {
    pub(crate) controllers: EntityCollection<u32, ControllerState>,
    pub(crate) doors: EntityCollection<String, DoorState>,
    pub(crate) cards: EntityCollection<u32, CardState>,

    controller_events: DashMap<u32, EventBuffer>,
    door_events: DashMap<String, EventBuffer>,
    card_events: DashMap<u32, EventBuffer>,

    pub(crate) last_refresh: DashMap<Component, DateTime<Utc>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self {
            controllers: EntityCollection::new(),
            doors: EntityCollection::new(),
            cards: EntityCollection::new(),
            controller_events: DashMap::new(),
            door_events: DashMap::new(),
            card_events: DashMap::new(),
            last_refresh: DashMap::new(),
        }
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn controllers_snapshot(&self) -> Arc<Vec<Arc<ControllerState>>> {
        self.controllers.snapshot()
    }

    pub fn doors_snapshot(&self) -> Arc<Vec<Arc<DoorState>>> {
        self.doors.snapshot()
    }

    pub fn cards_snapshot(&self) -> Arc<Vec<Arc<CardState>>> {
        self.cards.snapshot()
    }

    // ── Single-entity lookups ────────────────────────────────────────

    pub fn controller(&self, id: u32) -> Option<Arc<ControllerState>> {
        self.controllers.get(&id)
    }

    pub fn door(&self, name: &str) -> Option<Arc<DoorState>> {
        self.doors.get(name)
    }

    pub fn card(&self, card: u32) -> Option<Arc<CardState>> {
        self.cards.get(&card)
    }

    // ── Count accessors ──────────────────────────────────────────────

    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    pub fn door_count(&self) -> usize {
        self.doors.len()
    }

    pub fn card_count(&self) -> usize {
        self.cards.len()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_controllers(&self) -> EntityStream<ControllerState> {
        EntityStream::new(self.controllers.subscribe())
    }

    pub fn subscribe_doors(&self) -> EntityStream<DoorState> {
        EntityStream::new(self.doors.subscribe())
    }

    pub fn subscribe_cards(&self) -> EntityStream<CardState> {
        EntityStream::new(self.cards.subscribe())
    }

    /// Total number of mutations applied to the controller, door and card
    /// collections. Changes whenever any snapshot changes.
    pub fn version(&self) -> u64 {
        self.controllers.version() + self.doors.version() + self.cards.version()
    }

    // ── Event history ────────────────────────────────────────────────

    /// File `event` under its controller, and under its door and card when
    /// those are known.
    pub(crate) fn push_event(&self, event: &Event, directory: &Directory) {
        self.controller_events
            .entry(event.controller)
            .or_default()
            .push(event.clone());

        if let Some(name) = event
            .door
            .and_then(|door| directory.door_name(event.controller, door))
        {
            self.door_events
                .entry(name.to_owned())
                .or_default()
                .push(event.clone());
        }

        if let Some(card) = event.card {
            self.card_events.entry(card).or_default().push(event.clone());
        }
    }

    /// Take the oldest buffered event of a controller.
    pub fn pop_controller_event(&self, controller: u32) -> Option<Event> {
        self.controller_events.get_mut(&controller)?.pop()
    }

    /// Take the oldest buffered event of a door.
    pub fn pop_door_event(&self, name: &str) -> Option<Event> {
        self.door_events.get_mut(name)?.pop()
    }

    /// Take the oldest buffered event of a card.
    pub fn pop_card_event(&self, card: u32) -> Option<Event> {
        self.card_events.get_mut(&card)?.pop()
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControllerConfig, DoorConfig, RegistryConfig};
    use portier_api::{Direction, EventRecord, EventType, Reason};

    fn directory() -> Directory {
        Directory::new(&RegistryConfig {
            controllers: vec![ControllerConfig::new(405_419_896)],
            doors: vec![DoorConfig {
                name: "Great Hall".into(),
                controller: 405_419_896,
                door: 1,
            }],
            ..RegistryConfig::default()
        })
        .expect("valid config")
    }

    #[test]
    fn events_are_routed_to_every_related_entity() {
        let store = DataStore::new();
        let dir = directory();
        let event = Event::fetched(
            405_419_896,
            &EventRecord {
                index: 12,
                event_type: EventType::Swipe,
                granted: true,
                door: 1,
                direction: Direction::In,
                card: 10_058_400,
                timestamp: None,
                reason: Reason::Swipe,
            },
        );
        store.push_event(&event, &dir);

        assert_eq!(store.pop_door_event("Great Hall"), Some(event.clone()));
        assert_eq!(store.pop_card_event(10_058_400), Some(event.clone()));
        assert_eq!(store.pop_controller_event(405_419_896), Some(event));
        assert_eq!(store.pop_controller_event(405_419_896), None);
    }

    #[test]
    fn unmapped_door_is_only_filed_under_controller() {
        let store = DataStore::new();
        let dir = directory();
        let event = Event::relay(405_419_896, 4, true, chrono::NaiveDateTime::default());
        store.push_event(&event, &dir);

        assert_eq!(store.pop_door_event("Great Hall"), None);
        assert!(store.pop_controller_event(405_419_896).is_some());
    }
}
