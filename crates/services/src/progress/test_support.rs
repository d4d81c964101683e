//! Shared fixtures and a fault-injecting gateway for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use coach_core::Clock;
use coach_core::model::{
    ContentId, ContentItem, ContentType, LearnerId, NewProgress, ProgressId, ProgressPatch,
    ProgressRecord,
};
use coach_core::time::fixed_now;
use storage::repository::{InMemoryRepository, ProgressGateway, StorageError};
use tokio::sync::Notify;

pub(crate) fn learner() -> LearnerId {
    LearnerId::new("learner-1").unwrap()
}

pub(crate) fn cid(id: &str) -> ContentId {
    ContentId::new(id).unwrap()
}

pub(crate) fn milestone(id: &str, sequence: u32) -> ContentItem {
    ContentItem::new(cid(id), ContentType::Milestone, None, sequence, id, id, false).unwrap()
}

pub(crate) fn concept(id: &str, parent: &str, sequence: u32) -> ContentItem {
    member(id, parent, ContentType::Concept, sequence, false)
}

pub(crate) fn member(
    id: &str,
    parent: &str,
    content_type: ContentType,
    sequence: u32,
    has_form: bool,
) -> ContentItem {
    ContentItem::new(
        cid(id),
        content_type,
        Some(cid(parent)),
        sequence,
        id,
        id,
        has_form,
    )
    .unwrap()
}

pub(crate) fn started_record(id: &str) -> ProgressRecord {
    NewProgress::for_item(learner(), &concept(id, "m-1", 1))
        .into_record(ProgressId::generate(), fixed_now())
}

/// Time the fake store stamps on every write; differs from the client clock.
pub(crate) fn store_now() -> DateTime<Utc> {
    fixed_now() + Duration::minutes(1)
}

/// In-memory store with switchable failures and call counters.
pub(crate) struct FlakyGateway {
    inner: InMemoryRepository,
    fail_selects: AtomicBool,
    fail_upserts: AtomicBool,
    fail_updates: AtomicBool,
    yield_first: AtomicBool,
    hold_selects: AtomicBool,
    select_gate: Notify,
    pub(crate) upsert_calls: AtomicUsize,
    pub(crate) update_calls: AtomicUsize,
}

impl FlakyGateway {
    pub(crate) fn new() -> Self {
        Self {
            inner: InMemoryRepository::new().with_clock(Clock::fixed(store_now())),
            fail_selects: AtomicBool::new(false),
            fail_upserts: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            yield_first: AtomicBool::new(false),
            hold_selects: AtomicBool::new(false),
            select_gate: Notify::new(),
            upsert_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fail_selects(&self, fail: bool) {
        self.fail_selects.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Make every write yield once before touching the store, so joined
    /// futures interleave.
    pub(crate) fn yield_first(&self, on: bool) {
        self.yield_first.store(on, Ordering::SeqCst);
    }

    /// Park every select until [`FlakyGateway::release_select`] is called.
    pub(crate) fn hold_selects(&self, on: bool) {
        self.hold_selects.store(on, Ordering::SeqCst);
    }

    pub(crate) fn release_select(&self) {
        self.select_gate.notify_one();
    }

    pub(crate) async fn seed(&self, item: &ContentItem) -> ProgressRecord {
        self.inner
            .upsert_progress(NewProgress::for_item(learner(), item))
            .await
            .unwrap()
    }

    pub(crate) async fn seed_completed(&self, item: &ContentItem) -> ProgressRecord {
        self.seed(item).await;
        self.inner
            .update_progress(&learner(), item.id(), &ProgressPatch::complete(fixed_now()))
            .await
            .unwrap()
    }

    pub(crate) fn rows(&self) -> usize {
        self.inner.progress_len().unwrap()
    }

    async fn maybe_yield(&self) {
        if self.yield_first.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl ProgressGateway for FlakyGateway {
    async fn select_progress(
        &self,
        learner: &LearnerId,
    ) -> Result<Vec<ProgressRecord>, StorageError> {
        if self.hold_selects.load(Ordering::SeqCst) {
            self.select_gate.notified().await;
        }
        if self.fail_selects.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("select refused".into()));
        }
        self.inner.select_progress(learner).await
    }

    async fn upsert_progress(&self, record: NewProgress) -> Result<ProgressRecord, StorageError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_yield().await;
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("upsert refused".into()));
        }
        self.inner.upsert_progress(record).await
    }

    async fn update_progress(
        &self,
        learner: &LearnerId,
        content: &ContentId,
        patch: &ProgressPatch,
    ) -> Result<ProgressRecord, StorageError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_yield().await;
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StorageError::Conflict);
        }
        self.inner.update_progress(learner, content, patch).await
    }
}
