// ── Generic reactive entity collection ──
//
// Concurrent keyed storage with atomic per-key updates and push-based
// change notification via `watch` channels.

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

/// A concurrent, reactive collection for a single entity type.
///
/// Uses `DashMap` for O(1) lookups and per-key atomic read-modify-write,
/// and `watch` channels for push-based change notification. Every
/// mutation bumps a version counter and rebuilds the key-ordered snapshot
/// that subscribers receive.
pub(crate) struct EntityCollection<K, T>
where
    K: Ord + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    by_key: DashMap<K, Arc<T>>,

    /// Version counter, bumped on every mutation.
    version: watch::Sender<u64>,

    /// Full snapshot ordered by key, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<K, T> EntityCollection<K, T>
where
    K: Ord + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_key: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert or replace an entity. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: K, entity: T) -> bool {
        let is_new = self.by_key.insert(key, Arc::new(entity)).is_none();
        self.publish();
        is_new
    }

    /// Atomically modify the entity at `key`, creating it with `init`
    /// first if absent. Returns the updated entity.
    ///
    /// The closure runs under the key's shard lock: it must not block or
    /// touch this collection.
    pub(crate) fn update<I, F>(&self, key: K, init: I, f: F) -> Arc<T>
    where
        I: FnOnce() -> T,
        F: FnOnce(&mut T),
    {
        let updated = {
            let mut entry = self.by_key.entry(key).or_insert_with(|| Arc::new(init()));
            f(Arc::make_mut(entry.value_mut()));
            Arc::clone(entry.value())
        };
        self.publish();
        updated
    }

    /// Insert `init()` only if `key` is absent. Returns `true` if inserted.
    pub(crate) fn insert_if_absent<I>(&self, key: K, init: I) -> bool
    where
        I: FnOnce() -> T,
    {
        let inserted = match self.by_key.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(init()));
                true
            }
        };
        if inserted {
            self.publish();
        }
        inserted
    }

    pub(crate) fn get<Q>(&self, key: &Q) -> Option<Arc<T>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Rebuild the snapshot and bump the version.
    ///
    /// The map is read inside `send_modify` so concurrent publishers are
    /// serialized and the last one always sees every completed write.
    fn publish(&self) {
        self.snapshot.send_modify(|snap| {
            let mut entries: Vec<(K, Arc<T>)> = self
                .by_key
                .iter()
                .map(|r| (r.key().clone(), Arc::clone(r.value())))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            *snap = Arc::new(entries.into_iter().map(|(_, v)| v).collect());
        });
        self.version.send_modify(|v| *v += 1);
    }
}
