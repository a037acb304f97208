// ── Card poll coordinator ──
//
// Each controller keeps its own copy of a card. The cycle reads every copy
// and merges them into one `CardState`; writes are read-modify-write on
// each controller in turn.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDate};
use portier_api::{CardRecord, CardUpdate, Transport, verify};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::{Interest, Poller, expect_from, fan_out, within};
use crate::directory::Directory;
use crate::error::CoreError;
use crate::model::{CardState, ControllerState};
use crate::store::{Component, DataStore};

/// Card numbers controllers use for empty or deleted slots.
const EMPTY_SLOT: u32 = 0;
const DELETED_SLOT: u32 = u32::MAX;

/// Permission value written for "always allowed".
const ALWAYS: u8 = 1;

// ── Merge ────────────────────────────────────────────────────────────

/// Merge per-controller copies of `card` into one view.
///
/// Start date is the earliest, end date the latest, doors the union of
/// every non-zero slot that maps to a named door, PIN the first non-zero
/// one in `replies` order. A copy whose start is after its end does not
/// contribute dates, and a merged range that would still invert (copies
/// holding one date each) leaves both dates unset.
pub(crate) fn merge_card(card: u32, replies: &[CardRecord], directory: &Directory) -> CardState {
    let mut state = CardState::new(card);
    let held: Vec<&CardRecord> = replies.iter().filter(|r| r.card == card).collect();
    if held.is_empty() {
        return state;
    }
    state.available = true;

    let dated = held.iter().filter(|r| match (r.start_date, r.end_date) {
        (Some(start), Some(end)) => start <= end,
        _ => true,
    });
    let (starts, ends): (Vec<_>, Vec<_>) = dated.map(|r| (r.start_date, r.end_date)).unzip();
    match (starts.into_iter().flatten().min(), ends.into_iter().flatten().max()) {
        (Some(start), Some(end)) if start > end => {
            warn!(card, %start, %end, "controller copies disagree on validity, dates left unset");
        }
        (start, end) => {
            if let Some(start) = start {
                state.start_date.set(start);
            }
            if let Some(end) = end {
                state.end_date.set(end);
            }
        }
    }

    let doors: BTreeSet<String> = held
        .iter()
        .flat_map(|r| {
            (1u8..=4)
                .zip(r.doors)
                .filter(|(_, permission)| *permission != 0)
                .filter_map(move |(door, _)| directory.door_name(r.controller, door))
                .map(str::to_owned)
        })
        .collect();
    state.doors.set(doors);

    state
        .pin
        .set(held.iter().map(|r| r.pin).find(|pin| *pin != 0).unwrap_or(0));

    state
}

/// Default validity for a card created by a write: today until the end of
/// the year.
fn default_dates() -> (NaiveDate, NaiveDate) {
    let today = Local::now().date_naive();
    let end = NaiveDate::from_ymd_opt(today.year(), 12, 31).unwrap_or(today);
    (today, end)
}

/// The record to edit: the controller's copy, or defaults if it has none.
fn base_record(card: u32, current: &CardRecord) -> CardUpdate {
    let (start, end) = default_dates();
    if current.card == card {
        CardUpdate {
            card,
            start_date: current.start_date.unwrap_or(start),
            end_date: current.end_date.unwrap_or(end),
            doors: current.doors,
            pin: current.pin,
        }
    } else {
        CardUpdate {
            card,
            start_date: start,
            end_date: end,
            doors: [0; 4],
            pin: 0,
        }
    }
}

// ── CardCoordinator ──────────────────────────────────────────────────

/// Keeps [`CardState`] current for every tracked card and applies card
/// writes across controllers.
pub struct CardCoordinator {
    transport: Arc<dyn Transport>,
    directory: Arc<Directory>,
    store: Arc<DataStore>,
    interest: Interest<u32>,
    timeout: Duration,
    trigger: Arc<Notify>,
}

impl CardCoordinator {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        directory: Arc<Directory>,
        store: Arc<DataStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            directory,
            store,
            interest: Interest::new(),
            timeout,
            trigger: Arc::new(Notify::new()),
        }
    }

    /// Run one poll cycle.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        within(Self::NAME, self.timeout, async {
            let controllers = self.directory.controller_ids();
            self.refresh_counts(&controllers).await;

            let cards = self.interest.targets(|| self.directory.cards());
            for card in &cards {
                self.refresh_card(*card, &controllers).await;
            }
            debug!(cards = cards.len(), "card cycle complete");
            Ok(())
        })
        .await?;

        self.store.mark_refreshed(Component::Cards);
        Ok(())
    }

    /// Record how many cards each controller stores.
    async fn refresh_counts(&self, controllers: &[u32]) -> Vec<(u32, u32)> {
        let counts: Vec<(u32, u32)> = fan_out(controllers.iter().copied(), |id| async move {
            let controller = self.directory.resolve(id);
            match self.transport.get_cards(&controller).await {
                Ok(reply) => verify(id, reply).map(|r| (id, r.cards)),
                Err(e) => {
                    debug!(controller = id, error = %e, "card count fetch failed");
                    None
                }
            }
        })
        .await
        .into_iter()
        .flatten()
        .collect();

        for (id, cards) in &counts {
            self.store.controllers.update(
                *id,
                || ControllerState::new(*id),
                |state| state.cards.set(*cards),
            );
        }
        counts
    }

    /// Read `card` from every controller and write the merged view once.
    async fn refresh_card(&self, card: u32, controllers: &[u32]) {
        let replies: Vec<Option<CardRecord>> =
            fan_out(controllers.iter().copied(), |id| async move {
                let controller = self.directory.resolve(id);
                match self.transport.get_card(&controller, card).await {
                    Ok(reply) => verify(id, reply),
                    Err(e) => {
                        debug!(controller = id, card, error = %e, "card fetch failed");
                        None
                    }
                }
            })
            .await;

        let complete = replies.iter().all(Option::is_some);
        let answered: Vec<CardRecord> = replies.into_iter().flatten().collect();

        if answered.is_empty() {
            self.store
                .cards
                .insert_if_absent(card, || CardState::new(card));
            return;
        }

        let merged = merge_card(card, &answered, &self.directory);
        if complete {
            self.store.cards.upsert(card, merged);
        } else {
            // Missing controllers may hold the card: only add what we saw.
            self.store.cards.update(
                card,
                || CardState::new(card),
                |state| overlay(state, &merged),
            );
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Store `card` on every controller and start tracking it.
    ///
    /// Controllers that already hold the card keep their record.
    pub async fn add(&self, card: u32) -> Result<(), CoreError> {
        self.interest.add(card);
        self.rewrite("add-card", card, self.directory.controller_ids(), |_| {})
            .await
    }

    /// Remove `card` from every controller. Absent copies count as removed.
    pub async fn delete(&self, card: u32) -> Result<(), CoreError> {
        let targets = self.directory.controller_ids();
        let mut failed = Vec::new();
        for id in &targets {
            if let Err(e) = self.delete_one(*id, card).await {
                warn!(controller = id, card, error = %e, "delete-card failed");
                failed.push(*id);
            }
        }
        self.finish("delete-card", card, targets.len(), failed)
    }

    async fn delete_one(&self, id: u32, card: u32) -> Result<(), CoreError> {
        let controller = self.directory.resolve(id);
        let current = expect_from(id, self.transport.get_card(&controller, card).await?)?;
        if current.card != card {
            return Ok(());
        }
        let ack = expect_from(id, self.transport.delete_card(&controller, card).await?)?;
        if ack.ok {
            Ok(())
        } else {
            Err(CoreError::Rejected {
                controller: id,
                operation: "delete-card".into(),
            })
        }
    }

    pub async fn set_start_date(&self, card: u32, date: NaiveDate) -> Result<(), CoreError> {
        self.rewrite(
            "set-start-date",
            card,
            self.directory.controller_ids(),
            |update| update.start_date = date,
        )
        .await
    }

    pub async fn set_end_date(&self, card: u32, date: NaiveDate) -> Result<(), CoreError> {
        self.rewrite(
            "set-end-date",
            card,
            self.directory.controller_ids(),
            |update| update.end_date = date,
        )
        .await
    }

    pub async fn set_pin(&self, card: u32, pin: u32) -> Result<(), CoreError> {
        self.rewrite(
            "set-pin",
            card,
            self.directory.controller_ids(),
            |update| update.pin = pin,
        )
        .await
    }

    /// Grant or revoke access to one named door. Only the door's own
    /// controller is written.
    pub async fn set_door_permission(
        &self,
        card: u32,
        door: &str,
        allowed: bool,
    ) -> Result<(), CoreError> {
        let location = self
            .directory
            .door(door)
            .ok_or_else(|| CoreError::DoorNotFound {
                name: door.to_owned(),
            })?;
        let slot = usize::from(location.door.saturating_sub(1));

        self.rewrite(
            "set-door-permission",
            card,
            vec![location.controller],
            |update| {
                if let Some(permission) = update.doors.get_mut(slot) {
                    *permission = if allowed { ALWAYS } else { 0 };
                }
            },
        )
        .await
    }

    /// Apply `edit` to each target's copy of `card`, one controller at a
    /// time. Every target is attempted; failures are collected.
    async fn rewrite<F>(
        &self,
        operation: &str,
        card: u32,
        targets: Vec<u32>,
        edit: F,
    ) -> Result<(), CoreError>
    where
        F: Fn(&mut CardUpdate),
    {
        let mut failed = Vec::new();
        for id in &targets {
            if let Err(e) = self.rewrite_one(*id, card, &edit).await {
                warn!(controller = id, card, operation, error = %e, "card write failed");
                failed.push(*id);
            }
        }
        self.finish(operation, card, targets.len(), failed)
    }

    async fn rewrite_one<F>(&self, id: u32, card: u32, edit: &F) -> Result<(), CoreError>
    where
        F: Fn(&mut CardUpdate),
    {
        let controller = self.directory.resolve(id);
        let current = expect_from(id, self.transport.get_card(&controller, card).await?)?;

        let mut update = base_record(card, &current);
        edit(&mut update);

        let ack = expect_from(id, self.transport.put_card(&controller, &update).await?)?;
        if ack.ok {
            Ok(())
        } else {
            Err(CoreError::Rejected {
                controller: id,
                operation: "put-card".into(),
            })
        }
    }

    fn finish(
        &self,
        operation: &str,
        card: u32,
        attempted: usize,
        failed: Vec<u32>,
    ) -> Result<(), CoreError> {
        self.request_refresh();
        if failed.is_empty() {
            info!(card, operation, controllers = attempted, "card write applied");
            Ok(())
        } else {
            Err(CoreError::PartialFailure {
                operation: operation.to_owned(),
                card,
                attempted,
                failed,
            })
        }
    }

    // ── Discovery ────────────────────────────────────────────────────

    /// Walk every controller's card table and track each card found.
    ///
    /// Returns the newly tracked card numbers.
    pub async fn discover(&self) -> Vec<u32> {
        let controllers = self.directory.controller_ids();
        let counts = self.refresh_counts(&controllers).await;

        let mut found = BTreeSet::new();
        for (id, count) in counts {
            let controller = self.directory.resolve(id);
            let controller = &controller;
            let cards = fan_out(1..=count, |index| async move {
                match self.transport.get_card_by_index(controller, index).await {
                    Ok(reply) => verify(id, reply).map(|r| r.card),
                    Err(e) => {
                        debug!(controller = id, index, error = %e, "card index fetch failed");
                        None
                    }
                }
            })
            .await;
            found.extend(
                cards
                    .into_iter()
                    .flatten()
                    .filter(|card| *card != EMPTY_SLOT && *card != DELETED_SLOT),
            );
        }

        let added: Vec<u32> = found
            .into_iter()
            .filter(|card| self.interest.add(*card))
            .collect();
        if !added.is_empty() {
            info!(cards = added.len(), "discovered cards");
            self.request_refresh();
        }
        added
    }

    // ── Interest ─────────────────────────────────────────────────────

    /// Include `card` in future cycles.
    pub fn track(&self, card: u32) -> bool {
        self.interest.add(card)
    }

    /// Stop polling `card`. Its last-known state stays in the store.
    pub fn untrack(&self, card: u32) -> bool {
        self.interest.remove(&card)
    }

    pub fn tracked(&self) -> Vec<u32> {
        self.interest.current()
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn state(&self, card: u32) -> Option<Arc<CardState>> {
        self.store.card(card)
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<CardState>>> {
        self.store.cards_snapshot()
    }

    /// Ask the background task for an early cycle.
    pub fn request_refresh(&self) {
        self.trigger.notify_one();
    }

    pub(crate) fn trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.trigger)
    }
}

impl Poller for CardCoordinator {
    const NAME: &'static str = "cards";

    fn poll(&self) -> impl Future<Output = Result<(), CoreError>> + Send {
        self.refresh()
    }
}

/// Widen `state` with a merge that missed some controllers.
///
/// The date range only grows and doors are unioned: a controller that did
/// not answer may still hold the wider grant.
fn overlay(state: &mut CardState, merged: &CardState) {
    state.available |= merged.available;
    if let Some(start) = merged.start_date.value() {
        let widens = state.start_date.value().is_none_or(|current| start < current);
        let ordered = state.end_date.value().is_none_or(|end| start <= end);
        if widens && ordered {
            state.start_date.set(start);
        }
    }
    if let Some(end) = merged.end_date.value() {
        let widens = state.end_date.value().is_none_or(|current| end > current);
        let ordered = state.start_date.value().is_none_or(|start| start <= end);
        if widens && ordered {
            state.end_date.set(end);
        }
    }
    if let Some(doors) = merged.doors.get() {
        let mut union = state.doors.get().cloned().unwrap_or_default();
        union.extend(doors.iter().cloned());
        state.doors.set(union);
    }
    if let Some(pin) = merged.pin.value() {
        if pin != 0 || !state.pin.is_set() {
            state.pin.set(pin);
        }
    }
}
