// ── Controller poll coordinator ──
//
// Polls identity, listener, clock, anti-passback and interlock settings of
// every subscribed controller. Slow replies that miss the transport timeout
// are delivered later through a late-reply sink and merged by a separate
// task.

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use portier_api::{
    Ack, AntiPassback, AntiPassbackInfo, ControllerInfo, ControllerTime, Interlock, InterlockInfo,
    Late, LateReply, LateSender, ListenerInfo, Reply, Transport, verify,
};
use strum::Display;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Interest, Poller, fan_out, within};
use crate::directory::Directory;
use crate::error::CoreError;
use crate::model::ControllerState;
use crate::store::{Component, DataStore};

/// The independent requests issued per controller each cycle.
#[derive(Debug, Clone, Copy, Display)]
#[strum(serialize_all = "kebab-case")]
enum Fetch {
    Identity,
    Listener,
    Clock,
    AntiPassback,
    Interlock,
}

const FETCHES: [Fetch; 5] = [
    Fetch::Identity,
    Fetch::Listener,
    Fetch::Clock,
    Fetch::AntiPassback,
    Fetch::Interlock,
];

/// A reply that updates part of a controller's state.
#[derive(Debug)]
enum Observation {
    Identity(ControllerInfo),
    Listener(ListenerInfo),
    Clock(ControllerTime),
    AntiPassback(AntiPassbackInfo),
    Interlock(InterlockInfo),
}

impl Reply for Observation {
    fn controller(&self) -> u32 {
        match self {
            Self::Identity(r) => r.controller,
            Self::Listener(r) => r.controller,
            Self::Clock(r) => r.controller,
            Self::AntiPassback(r) => r.controller,
            Self::Interlock(r) => r.controller,
        }
    }
}

impl From<LateReply> for Observation {
    fn from(reply: LateReply) -> Self {
        match reply {
            LateReply::Controller(r) => Self::Identity(r),
            LateReply::Listener(r) => Self::Listener(r),
            LateReply::Time(r) => Self::Clock(r),
            LateReply::AntiPassback(r) => Self::AntiPassback(r),
        }
    }
}

/// Write the fields `observation` carries, and nothing else.
fn apply(store: &DataStore, observation: Observation) {
    let id = observation.controller();
    store
        .controllers
        .update(id, || ControllerState::new(id), |state| match observation {
            Observation::Identity(info) => {
                state.available = true;
                state.address.set(info.address);
                state.netmask.set(info.netmask);
                state.gateway.set(info.gateway);
                state.mac.set(info.mac);
                state.firmware.set(info.firmware);
            }
            Observation::Listener(info) => {
                state.listener.set(info.address);
                state.listener_interval.set(info.interval);
            }
            Observation::Clock(time) => state.datetime.set(time.datetime),
            Observation::AntiPassback(info) => state.antipassback.set(info.antipassback),
            Observation::Interlock(info) => state.interlock.set(info.interlock),
        });
}

// ── ControllerCoordinator ────────────────────────────────────────────

/// Keeps [`ControllerState`] current for every subscribed controller.
pub struct ControllerCoordinator {
    transport: Arc<dyn Transport>,
    directory: Arc<Directory>,
    store: Arc<DataStore>,
    interest: Interest<u32>,
    late_tx: mpsc::UnboundedSender<Late>,
    timeout: Duration,
    trigger: Arc<Notify>,
}

impl ControllerCoordinator {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        directory: Arc<Directory>,
        store: Arc<DataStore>,
        late_tx: mpsc::UnboundedSender<Late>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            directory,
            store,
            interest: Interest::new(),
            late_tx,
            timeout,
            trigger: Arc::new(Notify::new()),
        }
    }

    /// Run one poll cycle.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        within(Self::NAME, self.timeout, async {
            let targets = self.interest.targets(|| self.directory.controller_ids());
            let jobs: Vec<(u32, Fetch)> = targets
                .iter()
                .flat_map(|id| FETCHES.iter().map(move |fetch| (*id, *fetch)))
                .collect();
            let results = fan_out(jobs, |(id, fetch)| self.fetch(id, fetch)).await;

            let failed = results.iter().filter(|ok| !**ok).count();
            debug!(
                controllers = targets.len(),
                requests = results.len(),
                failed,
                "controller cycle complete"
            );
            Ok(())
        })
        .await?;

        self.store.mark_refreshed(Component::Controllers);
        Ok(())
    }

    /// Issue one fetch and merge its reply. Returns `false` on failure.
    async fn fetch(&self, id: u32, fetch: Fetch) -> bool {
        let controller = self.directory.resolve(id);
        let late = || Some(LateSender::new(id, self.late_tx.clone()));

        let result = match fetch {
            Fetch::Identity => self
                .transport
                .get_controller(&controller, late())
                .await
                .map(Observation::Identity),
            Fetch::Listener => self
                .transport
                .get_listener(&controller, late())
                .await
                .map(Observation::Listener),
            Fetch::Clock => self
                .transport
                .get_time(&controller, late())
                .await
                .map(Observation::Clock),
            Fetch::AntiPassback => self
                .transport
                .get_antipassback(&controller, late())
                .await
                .map(Observation::AntiPassback),
            Fetch::Interlock => self
                .transport
                .get_interlock(&controller)
                .await
                .map(Observation::Interlock),
        };

        match result {
            Ok(observation) => match verify(id, observation) {
                Some(observation) => {
                    apply(&self.store, observation);
                    true
                }
                None => false,
            },
            Err(e) => {
                debug!(controller = id, %fetch, error = %e, "controller fetch failed");
                self.store
                    .controllers
                    .insert_if_absent(id, || ControllerState::new(id));
                false
            }
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Set the controller clock. `None` if another controller answered.
    pub async fn set_clock(
        &self,
        id: u32,
        datetime: NaiveDateTime,
    ) -> Result<Option<ControllerTime>, CoreError> {
        let controller = self.directory.resolve(id);
        let reply = self.transport.set_time(&controller, datetime).await?;
        Ok(self.written(id, reply))
    }

    pub async fn set_interlock(
        &self,
        id: u32,
        interlock: Interlock,
    ) -> Result<Option<InterlockInfo>, CoreError> {
        let controller = self.directory.resolve(id);
        let reply = self.transport.set_interlock(&controller, interlock).await?;
        Ok(self.written(id, reply))
    }

    pub async fn set_antipassback(
        &self,
        id: u32,
        antipassback: AntiPassback,
    ) -> Result<Option<AntiPassbackInfo>, CoreError> {
        let controller = self.directory.resolve(id);
        let reply = self
            .transport
            .set_antipassback(&controller, antipassback)
            .await?;
        Ok(self.written(id, reply))
    }

    /// Point the controller's event push at `address`.
    ///
    /// `interval` is the auto-send period in seconds (0 sends on events
    /// only).
    pub async fn set_listener(
        &self,
        id: u32,
        address: SocketAddrV4,
        interval: u8,
    ) -> Result<Option<Ack>, CoreError> {
        let controller = self.directory.resolve(id);
        let reply = self
            .transport
            .set_listener(&controller, address, interval)
            .await?;
        Ok(self.written(id, reply))
    }

    fn written<R: Reply>(&self, id: u32, reply: R) -> Option<R> {
        let reply = verify(id, reply)?;
        self.request_refresh();
        Some(reply)
    }

    // ── Interest ─────────────────────────────────────────────────────

    /// Include `id` in future cycles. Returns `false` if already included.
    pub fn subscribe(&self, id: u32) -> bool {
        self.interest.add(id)
    }

    /// Stop polling `id`. Its last-known state stays in the store.
    pub fn unsubscribe(&self, id: u32) -> bool {
        self.interest.remove(&id)
    }

    pub fn subscribed(&self) -> Vec<u32> {
        self.interest.current()
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn state(&self, id: u32) -> Option<Arc<ControllerState>> {
        self.store.controller(id)
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<ControllerState>>> {
        self.store.controllers_snapshot()
    }

    /// Ask the background task for an early cycle.
    pub fn request_refresh(&self) {
        self.trigger.notify_one();
    }

    pub(crate) fn trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.trigger)
    }
}

impl Poller for ControllerCoordinator {
    const NAME: &'static str = "controllers";

    fn poll(&self) -> impl Future<Output = Result<(), CoreError>> + Send {
        self.refresh()
    }
}

// ── Late replies ─────────────────────────────────────────────────────

/// Merge replies that arrived after their request timed out.
///
/// Last writer wins: a late reply overwrites whatever its fields hold,
/// even if a newer cycle already wrote them.
pub(crate) async fn late_reply_task(
    store: Arc<DataStore>,
    mut rx: mpsc::UnboundedReceiver<Late>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            late = rx.recv() => {
                let Some(late) = late else { break };
                merge_late(&store, late);
            }
        }
    }
}

fn merge_late(store: &DataStore, late: Late) {
    let Late { expected, reply } = late;
    match verify(expected, Observation::from(reply)) {
        Some(observation) => {
            debug!(controller = expected, "merging late reply");
            apply(store, observation);
        }
        None => warn!(controller = expected, "dropping late reply"),
    }
}
