// ── Poll coordinators ──
//
// One coordinator per entity kind. Each runs a periodic cycle that fans
// requests out to the controllers it is interested in, merges the replies
// into the store, and exposes the write operations for its entity kind.

mod cards;
mod controllers;
mod doors;
mod events;

pub use cards::CardCoordinator;
pub use controllers::ControllerCoordinator;
pub use doors::DoorCoordinator;
pub use events::{EventCoordinator, MAX_CATCH_UP};

pub(crate) use controllers::late_reply_task;

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::stream::{self, StreamExt};
use portier_api::{Reply, verify};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;

/// Maximum requests in flight per fan-out.
pub const MAX_IN_FLIGHT: usize = 5;

// ── Bounded fan-out ──────────────────────────────────────────────────

/// Run `f` over `items` with at most [`MAX_IN_FLIGHT`] futures pending.
///
/// Results come back in completion order.
pub(crate) async fn fan_out<I, F, Fut, T>(items: I, f: F) -> Vec<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = T>,
{
    stream::iter(items)
        .map(f)
        .buffer_unordered(MAX_IN_FLIGHT)
        .collect()
        .await
}

/// Bound one cycle of `coordinator` by `limit`.
///
/// Whatever the cycle wrote before the deadline stays in the store.
pub(crate) async fn within<F>(
    coordinator: &'static str,
    limit: Duration,
    cycle: F,
) -> Result<(), CoreError>
where
    F: Future<Output = Result<(), CoreError>>,
{
    tokio::time::timeout(limit, cycle)
        .await
        .map_err(|_| CoreError::CycleTimeout {
            coordinator,
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        })?
}

/// Accept `reply` only if it came from `expected`.
pub(crate) fn expect_from<R: Reply>(expected: u32, reply: R) -> Result<R, CoreError> {
    let got = reply.controller();
    verify(expected, reply).ok_or(CoreError::ControllerMismatch { expected, got })
}

// ── Interest sets ────────────────────────────────────────────────────

/// The entities a coordinator polls.
///
/// Lock-free to read from the cycle while consumers add and remove
/// entries. The first cycle also pulls in every configured entity.
pub(crate) struct Interest<K: Ord + Clone> {
    set: ArcSwap<BTreeSet<K>>,
    primed: AtomicBool,
}

impl<K: Ord + Clone> Interest<K> {
    pub(crate) fn new() -> Self {
        Self {
            set: ArcSwap::from_pointee(BTreeSet::new()),
            primed: AtomicBool::new(false),
        }
    }

    /// Union `all` into the set, once.
    pub(crate) fn prime<I: IntoIterator<Item = K>>(&self, all: I) {
        if self.primed.swap(true, Ordering::AcqRel) {
            return;
        }
        let all: Vec<K> = all.into_iter().collect();
        self.set.rcu(|set| {
            let mut next = BTreeSet::clone(set);
            next.extend(all.iter().cloned());
            next
        });
    }

    /// Returns `true` if `key` was not already present.
    pub(crate) fn add(&self, key: K) -> bool {
        let previous = self.set.rcu(|set| {
            let mut next = BTreeSet::clone(set);
            next.insert(key.clone());
            next
        });
        !previous.contains(&key)
    }

    /// Returns `true` if `key` was present.
    pub(crate) fn remove(&self, key: &K) -> bool {
        let previous = self.set.rcu(|set| {
            let mut next = BTreeSet::clone(set);
            next.remove(key);
            next
        });
        previous.contains(key)
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.set.load().contains(key)
    }

    pub(crate) fn current(&self) -> Vec<K> {
        self.set.load().iter().cloned().collect()
    }

    /// Entities for this cycle, priming from `all` on first use.
    pub(crate) fn targets<I, F>(&self, all: F) -> Vec<K>
    where
        I: IntoIterator<Item = K>,
        F: FnOnce() -> I,
    {
        if !self.primed.load(Ordering::Acquire) {
            self.prime(all());
        }
        self.current()
    }
}

// ── Periodic scheduling ──────────────────────────────────────────────

/// A coordinator the scheduler can drive.
pub(crate) trait Poller: Send + Sync + 'static {
    const NAME: &'static str;

    fn poll(&self) -> impl Future<Output = Result<(), CoreError>> + Send;
}

/// Run `poller` every `period`, or early when `trigger` fires.
///
/// The first cycle runs immediately. A failed cycle is logged and the
/// schedule carries on.
pub(crate) async fn poll_task<P: Poller>(
    poller: Arc<P>,
    period: Duration,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
            () = trigger.notified() => {
                debug!(coordinator = P::NAME, "refresh requested");
                interval.reset();
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = poller.poll() => {
                if let Err(e) = result {
                    warn!(coordinator = P::NAME, error = %e, "poll cycle failed");
                }
            }
        }
    }

    debug!(coordinator = P::NAME, "poll task exiting");
}
