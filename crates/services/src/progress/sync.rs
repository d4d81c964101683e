use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use coach_core::Clock;
use coach_core::model::{ContentId, LearnerId, ProgressPatch, ProgressRecord};
use parking_lot::Mutex;
use storage::repository::ProgressGateway;

use super::cache::{CacheMutation, ProgressCache};
use crate::error::SyncError;

//
// ─── PENDING WRITE ─────────────────────────────────────────────────────────────
//

/// One optimistic mutation, from local apply to commit or rollback.
///
/// `begin` snapshots the cached record and merges the patch into the cache.
/// Exactly one of `commit` or `rollback` then settles it. Both are dropped
/// silently if the cache generation moved on in the meantime.
#[derive(Debug)]
#[must_use = "a pending write must be committed or rolled back"]
pub struct PendingWrite {
    content_id: ContentId,
    learner: LearnerId,
    patch: ProgressPatch,
    snapshot: ProgressRecord,
    generation: u64,
}

impl PendingWrite {
    /// Snapshot the current record and apply `patch` to the cache.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotCached` if the cache holds no record for
    /// `content_id`; nothing is created in that case.
    pub fn begin(
        cache: &ProgressCache,
        content_id: &ContentId,
        patch: ProgressPatch,
        at: DateTime<Utc>,
    ) -> Result<Self, SyncError> {
        let (snapshot, generation) = cache
            .snapshot_and_merge(content_id, &patch, at)
            .ok_or_else(|| SyncError::NotCached(content_id.clone()))?;
        Ok(Self {
            content_id: content_id.clone(),
            learner: snapshot.learner_id().clone(),
            patch,
            snapshot,
            generation,
        })
    }

    #[must_use]
    pub fn content_id(&self) -> &ContentId {
        &self.content_id
    }

    #[must_use]
    pub fn learner(&self) -> &LearnerId {
        &self.learner
    }

    #[must_use]
    pub fn patch(&self) -> &ProgressPatch {
        &self.patch
    }

    /// The record as it was before the optimistic apply.
    #[must_use]
    pub fn snapshot(&self) -> &ProgressRecord {
        &self.snapshot
    }

    /// Replace the optimistic value with the row the store returned.
    pub fn commit(self, cache: &ProgressCache, stored: ProgressRecord) -> bool {
        cache.apply_in(self.generation, CacheMutation::Upsert(stored))
    }

    /// Restore the pre-mutation snapshot.
    pub fn rollback(self, cache: &ProgressCache) -> bool {
        cache.apply_in(self.generation, CacheMutation::Upsert(self.snapshot))
    }
}

//
// ─── IN-FLIGHT GUARD ───────────────────────────────────────────────────────────
//

struct InFlight<'a> {
    keys: &'a Mutex<HashSet<ContentId>>,
    key: ContentId,
}

impl<'a> InFlight<'a> {
    fn claim(keys: &'a Mutex<HashSet<ContentId>>, key: &ContentId) -> Option<Self> {
        keys.lock().insert(key.clone()).then(|| Self {
            keys,
            key: key.clone(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}

//
// ─── ENGINE ────────────────────────────────────────────────────────────────────
//

/// Performs every progress mutation as optimistic apply, remote write, then
/// reconcile or roll back.
///
/// At most one write per content item is in flight; a second one is refused
/// with `SyncError::InFlight` instead of racing the first.
pub struct SyncEngine {
    cache: Arc<ProgressCache>,
    gateway: Arc<dyn ProgressGateway>,
    clock: Clock,
    in_flight: Mutex<HashSet<ContentId>>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(cache: Arc<ProgressCache>, gateway: Arc<dyn ProgressGateway>, clock: Clock) -> Self {
        Self {
            cache,
            gateway,
            clock,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[must_use]
    pub fn is_in_flight(&self, content_id: &ContentId) -> bool {
        self.in_flight.lock().contains(content_id)
    }

    /// Apply `patch` to the record for `content_id` and persist it.
    ///
    /// On success the cache holds exactly the row returned by the store. On a
    /// remote failure the cache is restored to the pre-write record. No retry
    /// is attempted.
    ///
    /// # Errors
    ///
    /// - `SyncError::NotCached` when no record is cached for the item.
    /// - `SyncError::InFlight` when another write for the item is pending.
    /// - `SyncError::Remote` when the store rejects the write (after rollback).
    /// - `SyncError::Discarded` when the cache was reloaded or torn down while
    ///   the write was in flight; the store may hold the new value.
    pub async fn write(
        &self,
        content_id: &ContentId,
        patch: ProgressPatch,
    ) -> Result<ProgressRecord, SyncError> {
        let _claim = InFlight::claim(&self.in_flight, content_id)
            .ok_or_else(|| SyncError::InFlight(content_id.clone()))?;

        let pending = PendingWrite::begin(&self.cache, content_id, patch, self.now())?;
        tracing::debug!(content = %content_id, "optimistic progress update applied");

        let result = self
            .gateway
            .update_progress(pending.learner(), content_id, pending.patch())
            .await;

        match result {
            Ok(stored) => {
                if pending.commit(&self.cache, stored.clone()) {
                    tracing::debug!(content = %content_id, status = %stored.status(), "progress write committed");
                    Ok(stored)
                } else {
                    Err(SyncError::Discarded(content_id.clone()))
                }
            }
            Err(err) => {
                tracing::warn!(content = %content_id, error = %err, "progress write failed; rolling back");
                if pending.rollback(&self.cache) {
                    Err(SyncError::Remote(err))
                } else {
                    Err(SyncError::Discarded(content_id.clone()))
                }
            }
        }
    }
}
