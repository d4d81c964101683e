//! In-process progress cache for the current learner.
//!
//! The cache is the single source of truth for rendering. Readers take
//! snapshots; only the sync engine and the initializer mutate it, through
//! [`ProgressCache::apply_in`]. Every mutation notifies subscribers
//! synchronously, after the state lock has been released, so a listener may
//! read the cache or (un)subscribe without deadlocking.
//!
//! Lifecycle: one instance per running app, created by `CoachServices` and
//! injected into every component. [`ProgressCache::load`] starts a learner
//! session, [`ProgressCache::teardown`] ends it. Both bump the cache
//! generation; in-flight results tagged with an older generation are dropped.
//! Subscribers outlive sessions and are removed only by their owners.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use coach_core::model::{ContentId, LearnerId, ProgressPatch, ProgressRecord};
use parking_lot::Mutex;
use storage::repository::{ProgressGateway, StorageError};

pub type SubscriptionId = u64;

type Listener = dyn Fn(&ProgressSnapshot) + Send + Sync;

/// Outcome of [`ProgressCache::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// The cache now mirrors the store.
    Fresh { records: usize },
    /// The read failed; the cache is empty and `load_error` is set.
    Failed(StorageError),
    /// Another load or a teardown started while this one was in flight.
    Superseded,
}

/// Immutable view of the cache handed to subscribers and readers.
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub learner: Option<LearnerId>,
    pub records: Arc<Vec<ProgressRecord>>,
    pub load_error: Option<StorageError>,
    pub generation: u64,
    pub version: u64,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn get(&self, content_id: &ContentId) -> Option<&ProgressRecord> {
        self.records
            .iter()
            .find(|record| record.content_id() == content_id)
    }

    /// True when the records may not reflect the store.
    ///
    /// An empty, stale snapshot is not the same as a learner with no progress.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.load_error.is_some()
    }
}

/// Change applied by the sync engine or initializer.
#[derive(Debug, Clone)]
pub(crate) enum CacheMutation {
    /// Insert or replace the record under its content id.
    Upsert(ProgressRecord),
    /// Merge a partial update into an existing record.
    Merge {
        content_id: ContentId,
        patch: ProgressPatch,
        at: DateTime<Utc>,
    },
    Remove(ContentId),
}

#[derive(Debug, Default)]
struct CacheState {
    learner: Option<LearnerId>,
    records: BTreeMap<ContentId, ProgressRecord>,
    load_error: Option<StorageError>,
    /// Set once the fetch for `learner` has resolved.
    loaded: bool,
    generation: u64,
    version: u64,
}

impl CacheState {
    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            learner: self.learner.clone(),
            records: Arc::new(self.records.values().cloned().collect()),
            load_error: self.load_error.clone(),
            generation: self.generation,
            version: self.version,
        }
    }

    fn mutate(&mut self, mutation: CacheMutation) -> bool {
        let changed = match mutation {
            CacheMutation::Upsert(record) => {
                self.records.insert(record.content_id().clone(), record);
                true
            }
            CacheMutation::Merge {
                content_id,
                patch,
                at,
            } => match self.records.get_mut(&content_id) {
                Some(record) => {
                    record.apply_patch(&patch, at);
                    true
                }
                None => false,
            },
            CacheMutation::Remove(content_id) => self.records.remove(&content_id).is_some(),
        };
        if changed {
            self.version += 1;
        }
        changed
    }
}

/// Observable container holding every progress record of the current learner.
#[derive(Default)]
pub struct ProgressCache {
    state: Mutex<CacheState>,
    listeners: Mutex<Vec<(SubscriptionId, Arc<Listener>)>>,
    next_id: AtomicU64,
}

impl ProgressCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`; it runs after every change until unsubscribed.
    pub fn subscribe(
        &self,
        listener: impl Fn(&ProgressSnapshot) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Does nothing if `id` is not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().len()
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().snapshot()
    }

    #[must_use]
    pub fn get(&self, content_id: &ContentId) -> Option<ProgressRecord> {
        self.state.lock().records.get(content_id).cloned()
    }

    #[must_use]
    pub fn learner(&self) -> Option<LearnerId> {
        self.state.lock().learner.clone()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// True once a load for `learner` has resolved and not been torn down.
    ///
    /// Stays false while the fetch is in flight, since its result replaces
    /// whatever was applied in the meantime.
    #[must_use]
    pub fn is_ready_for(&self, learner: &LearnerId) -> bool {
        let state = self.state.lock();
        state.loaded && state.learner.as_ref() == Some(learner)
    }

    /// Replace the cache with every record the store holds for `learner`.
    ///
    /// A failed read leaves the cache empty with `load_error` set; callers
    /// must check the returned status rather than assume fresh data.
    pub async fn load(&self, gateway: &dyn ProgressGateway, learner: LearnerId) -> LoadStatus {
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.learner = Some(learner.clone());
            state.records.clear();
            state.load_error = None;
            state.loaded = false;
            state.version += 1;
            state.generation
        };

        let fetched = gateway.select_progress(&learner).await;

        let status = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return LoadStatus::Superseded;
            }
            state.loaded = true;
            state.version += 1;
            match fetched {
                Ok(records) => {
                    state.records = records
                        .into_iter()
                        .map(|record| (record.content_id().clone(), record))
                        .collect();
                    tracing::info!(
                        learner = %learner,
                        records = state.records.len(),
                        "progress cache loaded"
                    );
                    LoadStatus::Fresh {
                        records: state.records.len(),
                    }
                }
                Err(err) => {
                    tracing::warn!(learner = %learner, error = %err, "progress cache load failed");
                    state.load_error = Some(err.clone());
                    LoadStatus::Failed(err)
                }
            }
        };

        self.notify();
        status
    }

    /// Clear the cache and end the learner session.
    ///
    /// Subscribers stay registered and see the emptied snapshot. Results of
    /// requests still in flight are discarded when they resolve.
    pub fn teardown(&self) {
        {
            let mut state = self.state.lock();
            state.generation += 1;
            state.version += 1;
            state.learner = None;
            state.records.clear();
            state.load_error = None;
            state.loaded = false;
        }
        tracing::debug!("progress cache torn down");
        self.notify();
    }

    /// Apply `mutation` if the cache is still at `generation`.
    ///
    /// Returns false when the mutation was dropped, either because the
    /// generation moved on or because it targeted a missing record.
    pub(crate) fn apply_in(&self, generation: u64, mutation: CacheMutation) -> bool {
        let changed = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return false;
            }
            state.mutate(mutation)
        };
        if changed {
            self.notify();
        }
        changed
    }

    /// Snapshot the record for `content_id`, then merge `patch` into it.
    ///
    /// Both steps happen under one lock. Returns the pre-merge record and the
    /// generation it belongs to, or `None` when nothing is cached.
    pub(crate) fn snapshot_and_merge(
        &self,
        content_id: &ContentId,
        patch: &ProgressPatch,
        at: DateTime<Utc>,
    ) -> Option<(ProgressRecord, u64)> {
        let taken = {
            let mut state = self.state.lock();
            let before = state.records.get(content_id).cloned()?;
            state.mutate(CacheMutation::Merge {
                content_id: content_id.clone(),
                patch: patch.clone(),
                at,
            });
            (before, state.generation)
        };
        self.notify();
        Some(taken)
    }

    fn notify(&self) {
        let snapshot = self.snapshot();
        let listeners: Vec<Arc<Listener>> = {
            let guard = self.listeners.lock();
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for listener in listeners {
            listener(&snapshot);
        }
    }
}
