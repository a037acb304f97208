// ── Event reconciliation coordinator ──
//
// Events reach the engine two ways: controllers push a status datagram
// whenever they log one, and each cycle polls the controller's log index
// and downloads whatever was missed. Both paths advance the same
// per-controller cursor, so an event is appended once. Relay bitmask
// changes seen on either path synthesize lock/unlock events.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use dashmap::DashMap;
use portier_api::{EventRecord, Status, Transport, verify};
use tokio::sync::{Notify, broadcast};
use tracing::{debug, trace, warn};

use super::{Interest, Poller, expect_from, within};
use crate::directory::Directory;
use crate::error::CoreError;
use crate::model::{ControllerState, Event};
use crate::store::{Component, DataStore};
use crate::stream::{EventFilter, EventSubscription};

/// Most events downloaded per controller per cycle.
pub const MAX_CATCH_UP: u32 = 16;

const EVENT_CHANNEL_SIZE: usize = 256;

/// Appended indices kept above an unfetched gap before the gap is given up.
const MAX_AHEAD: usize = 64;

/// Per-controller reconciliation state.
///
/// Every index up to `settled` has been appended (or predates the
/// cursor). Pushed events can land past a gap; those indices wait in
/// `ahead` until catch-up fills the gap below them.
#[derive(Debug, Clone, Default)]
struct Cursor {
    settled: Option<u32>,
    ahead: BTreeSet<u32>,
    /// Relay bitmask at the last observation.
    relays: Option<u8>,
}

impl Cursor {
    /// Index of the newest event appended, or the device index at
    /// initialization.
    fn last_index(&self) -> Option<u32> {
        self.ahead.last().copied().or(self.settled)
    }

    fn holds(&self, index: u32) -> bool {
        self.settled.is_some_and(|settled| index <= settled) || self.ahead.contains(&index)
    }

    /// Record `index` as appended. Returns `false` if it already was.
    fn append(&mut self, index: u32) -> bool {
        let Some(settled) = self.settled else {
            self.settled = Some(index);
            return true;
        };
        if self.holds(index) {
            return false;
        }
        if index == settled + 1 {
            self.settled = Some(index);
        } else {
            self.ahead.insert(index);
        }
        self.compact();
        true
    }

    fn compact(&mut self) {
        if self.ahead.len() > MAX_AHEAD {
            // Give up on the gap below the oldest pending index.
            self.settled = self.ahead.first().map(|first| first - 1);
        }
        while let Some(next) = self.settled.and_then(|settled| settled.checked_add(1)) {
            if !self.ahead.remove(&next) {
                break;
            }
            self.settled = Some(next);
        }
    }

    /// Indices to download, at most [`MAX_CATCH_UP`] past the settled
    /// index, skipping those already appended.
    fn missing(&self, device_index: u32) -> Vec<u32> {
        let Some(settled) = self.settled else {
            return Vec::new();
        };
        let last = device_index.min(settled.saturating_add(MAX_CATCH_UP));
        (settled.saturating_add(1)..=last)
            .filter(|index| !self.ahead.contains(index))
            .collect()
    }
}

/// Lock/unlock events for every relay bit that changed.
///
/// The first observation of a controller (`previous == None`) only
/// records the bitmask.
pub(crate) fn diff_relays(
    controller: u32,
    previous: Option<u8>,
    current: u8,
    at: NaiveDateTime,
) -> Vec<Event> {
    let Some(previous) = previous else {
        return Vec::new();
    };
    let changed = previous ^ current;
    (1u8..=4)
        .filter(|door| changed & (1 << (door - 1)) != 0)
        .map(|door| Event::relay(controller, door, current & (1 << (door - 1)) != 0, at))
        .collect()
}

// ── EventCoordinator ─────────────────────────────────────────────────

/// Merges pushed and polled events into per-entity history.
pub struct EventCoordinator {
    transport: Arc<dyn Transport>,
    directory: Arc<Directory>,
    store: Arc<DataStore>,
    interest: Interest<u32>,
    cursors: DashMap<u32, Cursor>,
    event_tx: broadcast::Sender<Arc<Event>>,
    /// Fired after every pushed datagram; wired to the door refresh.
    arrival: Arc<Notify>,
    timeout: Duration,
    trigger: Arc<Notify>,
}

impl EventCoordinator {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        directory: Arc<Directory>,
        store: Arc<DataStore>,
        arrival: Arc<Notify>,
        timeout: Duration,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let interest = Interest::new();
        // Pushed datagrams may arrive before the first cycle.
        interest.prime(directory.controller_ids());

        Self {
            transport,
            directory,
            store,
            interest,
            cursors: DashMap::new(),
            event_tx,
            arrival,
            timeout,
            trigger: Arc::new(Notify::new()),
        }
    }

    /// Run one active catch-up cycle over the subscribed controllers.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        within(Self::NAME, self.timeout, async {
            for id in self.interest.targets(|| self.directory.controller_ids()) {
                if let Err(e) = self.poll_controller(id).await {
                    debug!(controller = id, error = %e, "event poll failed");
                }
            }
            Ok(())
        })
        .await?;

        self.store.mark_refreshed(Component::Events);
        Ok(())
    }

    async fn poll_controller(&self, id: u32) -> Result<(), CoreError> {
        let controller = self.directory.resolve(id);

        match self.transport.record_special_events(&controller, true).await {
            Ok(ack) => {
                if !verify(id, ack).is_some_and(|ack| ack.ok) {
                    warn!(controller = id, "controller refused to record special events");
                }
            }
            Err(e) => warn!(controller = id, error = %e, "could not enable special events"),
        }

        let status = expect_from(id, self.transport.get_status(&controller).await?)?;
        self.observe(&status);

        let device_index = status.event_index();
        for index in self.catch_up_range(id, device_index) {
            // A pushed datagram may have delivered it since the range was taken.
            if self.cursors.get(&id).is_some_and(|c| c.holds(index)) {
                continue;
            }
            let reply = match self.transport.get_event(&controller, index).await {
                Ok(reply) => reply,
                Err(e) => {
                    debug!(controller = id, index, error = %e, "event fetch failed");
                    break;
                }
            };
            let Some(reply) = verify(id, reply) else {
                break;
            };
            if reply.event.index != index {
                warn!(controller = id, index, got = reply.event.index, "event reply for another index");
                break;
            }
            self.accept(id, &reply.event);
        }
        Ok(())
    }

    /// Indices to download this cycle, initializing the cursor on first
    /// sight of the controller.
    fn catch_up_range(&self, id: u32, device_index: u32) -> Vec<u32> {
        let mut cursor = self.cursors.entry(id).or_default();
        if cursor.settled.is_none() {
            debug!(controller = id, index = device_index, "event cursor initialized");
            cursor.settled = Some(device_index);
            return Vec::new();
        }
        cursor.missing(device_index)
    }

    /// Append `record` unless its index was already appended.
    fn accept(&self, id: u32, record: &EventRecord) -> bool {
        let event = {
            let mut cursor = self.cursors.entry(id).or_default();
            if !cursor.append(record.index) {
                return false;
            }
            let event = Arc::new(Event::fetched(id, record));
            self.store.push_event(&event, &self.directory);
            event
        };
        let _ = self.event_tx.send(event);
        true
    }

    /// Diff the relay bitmask and record the controller clock.
    fn observe(&self, status: &Status) {
        let id = status.controller;
        let synthesized = {
            let mut cursor = self.cursors.entry(id).or_default();
            let previous = cursor.relays.replace(status.relays);
            diff_relays(id, previous, status.relays, Local::now().naive_local())
        };
        for event in synthesized {
            trace!(controller = id, door = ?event.door, reason = %event.reason, "relay transition");
            self.store.push_event(&event, &self.directory);
            let _ = self.event_tx.send(Arc::new(event));
        }

        if let Some(datetime) = status.system_datetime {
            self.store
                .controllers
                .update(id, || ControllerState::new(id), |state| {
                    state.datetime.set(datetime);
                });
        }
    }

    /// Handle a status datagram pushed by a controller.
    pub fn on_pushed(&self, status: &Status) {
        let id = status.controller;
        if !self.interest.contains(&id) {
            trace!(controller = id, "ignoring datagram from unsubscribed controller");
            return;
        }

        if let Some(record) = status.event.as_ref().filter(|r| r.index != 0) {
            if !self.accept(id, record) {
                trace!(controller = id, index = record.index, "duplicate pushed event");
            }
        }
        self.observe(status);
        self.arrival.notify_one();
    }

    // ── Interest ─────────────────────────────────────────────────────

    pub fn subscribe(&self, id: u32) -> bool {
        self.interest.add(id)
    }

    /// Stop reconciling `id`. Pushed datagrams from it are ignored.
    pub fn unsubscribe(&self, id: u32) -> bool {
        self.interest.remove(&id)
    }

    pub fn subscribed(&self) -> Vec<u32> {
        self.interest.current()
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Index of the newest event seen from `id`.
    pub fn last_known_index(&self, id: u32) -> Option<u32> {
        self.cursors.get(&id).and_then(|c| c.last_index())
    }

    /// Live feed of every appended or synthesized event.
    pub fn events(&self) -> broadcast::Receiver<Arc<Event>> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_events(&self, filter: EventFilter) -> EventSubscription {
        EventSubscription::new(self.event_tx.subscribe(), filter)
    }

    /// Ask the background task for an early cycle.
    pub fn request_refresh(&self) {
        self.trigger.notify_one();
    }

    pub(crate) fn trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.trigger)
    }
}

impl Poller for EventCoordinator {
    const NAME: &'static str = "events";

    fn poll(&self) -> impl Future<Output = Result<(), CoreError>> + Send {
        self.refresh()
    }
}
