use async_trait::async_trait;
use coach_core::Clock;
use coach_core::model::{
    ContentId, ContentItem, LearnerId, NewProgress, ProgressId, ProgressPatch, ProgressRecord,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Contract of the authoritative progress store.
///
/// Every call is a suspension point for callers; nothing here is cached.
#[async_trait]
pub trait ProgressGateway: Send + Sync {
    /// Fetch every progress record owned by `learner`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn select_progress(&self, learner: &LearnerId)
    -> Result<Vec<ProgressRecord>, StorageError>;

    /// Insert a progress record keyed on `(learner, content)`.
    ///
    /// Duplicates are not ignored: when the pair already exists the stored
    /// row is returned instead of an error. A stored `not_started` row is
    /// promoted to the requested status; any other row is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn upsert_progress(&self, record: NewProgress) -> Result<ProgressRecord, StorageError>;

    /// Apply `patch` to the stored record and return the row as stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no record matches the pair, or other
    /// storage errors.
    async fn update_progress(
        &self,
        learner: &LearnerId,
        content: &ContentId,
        patch: &ProgressPatch,
    ) -> Result<ProgressRecord, StorageError>;
}

/// Read access to curriculum metadata, plus the authoring write used by seeding.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Fetch every content item, ordered by sequence.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn select_content_meta(&self) -> Result<Vec<ContentItem>, StorageError>;

    /// Persist or update a content item.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the item cannot be stored.
    async fn upsert_content(&self, item: &ContentItem) -> Result<(), StorageError>;
}

/// Simple in-memory store for testing and prototyping.
///
/// Stamps `updated_at` with its own clock, like a server would.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    clock: Clock,
    progress: Arc<Mutex<BTreeMap<(LearnerId, ContentId), ProgressRecord>>>,
    content: Arc<Mutex<BTreeMap<ContentId, ContentItem>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Number of stored progress rows, across learners.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn progress_len(&self) -> Result<usize, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.len())
    }
}

#[async_trait]
impl ProgressGateway for InMemoryRepository {
    async fn select_progress(
        &self,
        learner: &LearnerId,
    ) -> Result<Vec<ProgressRecord>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .iter()
            .filter(|((owner, _), _)| owner == learner)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn upsert_progress(&self, record: NewProgress) -> Result<ProgressRecord, StorageError> {
        let now = self.clock.now();
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let key = (record.learner_id.clone(), record.content_id.clone());
        let status = record.status;
        let stored = guard
            .entry(key)
            .and_modify(|existing| existing.promote_from_not_started(status, now))
            .or_insert_with(|| record.into_record(ProgressId::generate(), now));
        Ok(stored.clone())
    }

    async fn update_progress(
        &self,
        learner: &LearnerId,
        content: &ContentId,
        patch: &ProgressPatch,
    ) -> Result<ProgressRecord, StorageError> {
        let now = self.clock.now();
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let stored = guard
            .get_mut(&(learner.clone(), content.clone()))
            .ok_or(StorageError::NotFound)?;
        stored.apply_patch(patch, now);
        Ok(stored.clone())
    }
}

#[async_trait]
impl ContentRepository for InMemoryRepository {
    async fn select_content_meta(&self) -> Result<Vec<ContentItem>, StorageError> {
        let guard = self
            .content
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut items: Vec<ContentItem> = guard.values().cloned().collect();
        items.sort_by(|a, b| (a.sequence(), a.id()).cmp(&(b.sequence(), b.id())));
        Ok(items)
    }

    async fn upsert_content(&self, item: &ContentItem) -> Result<(), StorageError> {
        let mut guard = self
            .content
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(item.id().clone(), item.clone());
        Ok(())
    }
}

/// Aggregates the store contracts behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressGateway>,
    pub content: Arc<dyn ContentRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    #[must_use]
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: ProgressGateway + ContentRepository + Clone + 'static,
    {
        let progress: Arc<dyn ProgressGateway> = Arc::new(repo.clone());
        let content: Arc<dyn ContentRepository> = Arc::new(repo);
        Self { progress, content }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use coach_core::model::{ContentType, ProgressStatus};
    use coach_core::time::fixed_now;

    fn learner() -> LearnerId {
        LearnerId::new("learner-1").unwrap()
    }

    fn exercise() -> ContentItem {
        ContentItem::new(
            ContentId::new("ex-1").unwrap(),
            ContentType::Exercise,
            Some(ContentId::new("m-1").unwrap()),
            1,
            "Reflect",
            "reflect",
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn duplicate_upsert_returns_existing_row() {
        let repo = InMemoryRepository::new().with_clock(Clock::fixed(fixed_now()));
        let first = repo
            .upsert_progress(NewProgress::for_item(learner(), &exercise()))
            .await
            .unwrap();
        let second = repo
            .upsert_progress(NewProgress::for_item(learner(), &exercise()))
            .await
            .unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(repo.progress_len().unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_never_downgrades_completed_rows() {
        let repo = InMemoryRepository::new().with_clock(Clock::fixed(fixed_now()));
        let item = exercise();
        repo.upsert_progress(NewProgress::for_item(learner(), &item))
            .await
            .unwrap();
        repo.update_progress(&learner(), item.id(), &ProgressPatch::complete(fixed_now()))
            .await
            .unwrap();

        let again = repo
            .upsert_progress(NewProgress::for_item(learner(), &item))
            .await
            .unwrap();
        assert_eq!(again.status(), ProgressStatus::Completed);
    }

    #[tokio::test]
    async fn update_stamps_store_clock_and_reports_missing_rows() {
        let stamped = fixed_now() + Duration::seconds(30);
        let repo = InMemoryRepository::new().with_clock(Clock::fixed(stamped));
        let item = exercise();

        let missing = repo
            .update_progress(&learner(), item.id(), &ProgressPatch::form_completed())
            .await
            .unwrap_err();
        assert_eq!(missing, StorageError::NotFound);

        repo.upsert_progress(NewProgress::for_item(learner(), &item))
            .await
            .unwrap();
        let updated = repo
            .update_progress(&learner(), item.id(), &ProgressPatch::complete(fixed_now()))
            .await
            .unwrap();
        assert_eq!(updated.updated_at(), stamped);
        assert_eq!(updated.completed_at(), Some(fixed_now()));
    }

    #[tokio::test]
    async fn select_progress_filters_by_learner() {
        let repo = InMemoryRepository::new();
        let other = LearnerId::new("learner-2").unwrap();
        repo.upsert_progress(NewProgress::for_item(learner(), &exercise()))
            .await
            .unwrap();
        repo.upsert_progress(NewProgress::for_item(other.clone(), &exercise()))
            .await
            .unwrap();

        let mine = repo.select_progress(&learner()).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].learner_id(), &learner());
    }
}
