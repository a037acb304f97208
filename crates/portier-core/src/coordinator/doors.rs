// ── Door poll coordinator ──
//
// Combines the per-controller status bitmasks with per-door control
// settings into one `DoorState` per named door.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use portier_api::{DoorControl, DoorMode, Status, Transport, verify};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::{Interest, Poller, expect_from, fan_out, within};
use crate::directory::{Directory, DoorRef};
use crate::error::CoreError;
use crate::model::DoorState;
use crate::store::{Component, DataStore};

/// Relay, open and button state of one door, read from one status reply.
#[derive(Debug, Clone, Copy)]
struct DoorBits {
    unlocked: bool,
    open: bool,
    button: bool,
}

impl DoorBits {
    fn from_status(status: &Status, door: u8) -> Option<Self> {
        let slot = usize::from(door.checked_sub(1)?);
        Some(Self {
            unlocked: status.unlocked(door)?,
            open: *status.doors_open.get(slot)?,
            button: *status.buttons.get(slot)?,
        })
    }
}

fn check_door(controller: u32, door: u8) -> Result<(), CoreError> {
    if (1..=4).contains(&door) {
        Ok(())
    } else {
        Err(CoreError::InvalidDoor { controller, door })
    }
}

/// Accept a door control reply only from `controller` about `door`.
fn for_door(controller: u32, door: u8, reply: DoorControl) -> Option<DoorControl> {
    let reply = verify(controller, reply)?;
    if reply.door == door {
        Some(reply)
    } else {
        warn!(controller, door, got = reply.door, "door control reply for another door");
        None
    }
}

// ── DoorCoordinator ──────────────────────────────────────────────────

/// Keeps [`DoorState`] current for every subscribed door.
pub struct DoorCoordinator {
    transport: Arc<dyn Transport>,
    directory: Arc<Directory>,
    store: Arc<DataStore>,
    interest: Interest<String>,
    timeout: Duration,
    trigger: Arc<Notify>,
}

impl DoorCoordinator {
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
            let doors: Vec<(String, DoorRef)> = self
                .interest
                .targets(|| self.directory.door_names())
                .into_iter()
                .filter_map(|name| self.directory.door(&name).map(|r| (name, r)))
                .collect();

            let controllers: BTreeSet<u32> = doors.iter().map(|(_, r)| r.controller).collect();
            let statuses: HashMap<u32, Status> =
                fan_out(controllers, |id| self.fetch_status(id))
                    .await
                    .into_iter()
                    .flatten()
                    .collect();

            let statuses = &statuses;
            fan_out(doors, |(name, location)| async move {
                self.refresh_door(&name, location, statuses.get(&location.controller))
                    .await;
            })
            .await;

            debug!(controllers = statuses.len(), "door cycle complete");
            Ok(())
        })
        .await?;

        self.store.mark_refreshed(Component::Doors);
        Ok(())
    }

    async fn fetch_status(&self, id: u32) -> Option<(u32, Status)> {
        let controller = self.directory.resolve(id);
        match self.transport.get_status(&controller).await {
            Ok(status) => verify(id, status).map(|s| (id, s)),
            Err(e) => {
                debug!(controller = id, error = %e, "status fetch failed");
                None
            }
        }
    }

    /// Fetch the door's control settings and write the whole record.
    ///
    /// Without a status the previous relay, open and button values stay.
    /// Without control settings the door is unavailable this cycle.
    async fn refresh_door(&self, name: &str, location: DoorRef, status: Option<&Status>) {
        let controller = self.directory.resolve(location.controller);
        let control = match self
            .transport
            .get_door_control(&controller, location.door)
            .await
        {
            Ok(reply) => for_door(location.controller, location.door, reply),
            Err(e) => {
                debug!(door = %name, controller = location.controller, error = %e, "door control fetch failed");
                None
            }
        };
        let bits = status.and_then(|s| DoorBits::from_status(s, location.door));

        self.store.doors.update(
            name.to_owned(),
            || DoorState::new(name, location.controller, location.door),
            |state| {
                if let Some(control) = control {
                    state.mode.set(control.mode);
                    state.delay.set(control.delay);
                }
                if let Some(bits) = bits {
                    state.unlocked.set(bits.unlocked);
                    state.open.set(bits.open);
                    state.button.set(bits.button);
                }
                state.available =
                    control.is_some() && state.unlocked.is_set() && state.mode.is_set();
            },
        );
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Change the control mode, keeping the current delay.
    pub async fn set_mode(
        &self,
        controller: u32,
        door: u8,
        mode: DoorMode,
    ) -> Result<Option<DoorControl>, CoreError> {
        self.modify_control(controller, door, |current| (mode, current.delay))
            .await
    }

    /// Change the unlock delay, keeping the current mode.
    pub async fn set_delay(
        &self,
        controller: u32,
        door: u8,
        delay: u8,
    ) -> Result<Option<DoorControl>, CoreError> {
        self.modify_control(controller, door, |current| (current.mode, delay))
            .await
    }

    async fn modify_control<F>(
        &self,
        id: u32,
        door: u8,
        edit: F,
    ) -> Result<Option<DoorControl>, CoreError>
    where
        F: FnOnce(&DoorControl) -> (DoorMode, u8),
    {
        check_door(id, door)?;
        let controller = self.directory.resolve(id);

        let current = self.transport.get_door_control(&controller, door).await?;
        let Some(current) = for_door(id, door, current) else {
            warn!(controller = id, door, "no usable door control reply, nothing written");
            return Ok(None);
        };
        let (mode, delay) = edit(&current);

        let reply = self
            .transport
            .set_door_control(&controller, door, mode, delay)
            .await?;
        let reply = for_door(id, door, reply);
        if reply.is_some() {
            self.request_refresh();
        }
        Ok(reply)
    }

    /// Pulse the door relay. Returns whether the controller reports the
    /// door opened.
    pub async fn unlock(&self, id: u32, door: u8) -> Result<bool, CoreError> {
        check_door(id, door)?;
        let controller = self.directory.resolve(id);
        let ack = expect_from(id, self.transport.open_door(&controller, door).await?)?;
        if ack.ok {
            self.request_refresh();
        }
        Ok(ack.ok)
    }

    /// Unlock a door by name. Unknown names fail closed without contacting
    /// any controller.
    pub async fn unlock_by_name(&self, name: &str) -> bool {
        let Some(location) = self.directory.door(name) else {
            warn!(door = %name, "unlock requested for unknown door");
            return false;
        };

        match self.unlock(location.controller, location.door).await {
            Ok(true) => {
                info!(door = %name, "door unlocked");
                true
            }
            Ok(false) => {
                warn!(door = %name, "controller refused to open door");
                false
            }
            Err(e) => {
                warn!(door = %name, error = %e, "unlock failed");
                false
            }
        }
    }

    // ── Interest ─────────────────────────────────────────────────────

    /// Include a configured door in future cycles.
    pub fn subscribe(&self, name: &str) -> Result<bool, CoreError> {
        if self.directory.door(name).is_none() {
            return Err(CoreError::DoorNotFound {
                name: name.to_owned(),
            });
        }
        Ok(self.interest.add(name.to_owned()))
    }

    /// Stop polling a door. Its last-known state stays in the store.
    pub fn unsubscribe(&self, name: &str) -> bool {
        self.interest.remove(&name.to_owned())
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.interest.current()
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn state(&self, name: &str) -> Option<Arc<DoorState>> {
        self.store.door(name)
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<DoorState>>> {
        self.store.doors_snapshot()
    }

    /// Ask the background task for an early cycle.
    pub fn request_refresh(&self) {
        self.trigger.notify_one();
    }

    pub(crate) fn trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.trigger)
    }
}

impl Poller for DoorCoordinator {
    const NAME: &'static str = "doors";

    fn poll(&self) -> impl Future<Output = Result<(), CoreError>> + Send {
        self.refresh()
    }
}
