use std::collections::HashSet;
use std::sync::Arc;

use coach_core::model::{ContentId, ContentItem, LearnerId, NewProgress, ProgressRecord, ProgressStatus};
use parking_lot::Mutex;
use storage::repository::ProgressGateway;

use super::cache::{CacheMutation, ProgressCache};
use crate::error::InitError;

/// What `ContentInitializer::ensure` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// A started record was already cached; no request was made.
    Existing(ProgressRecord),
    /// The store returned the row for the pair, new or pre-existing.
    Upserted(ProgressRecord),
    /// This session already tried for the pair; no request was made.
    AlreadyAttempted,
}

/// Lazily creates the one progress record per (learner, content item).
pub struct ContentInitializer {
    cache: Arc<ProgressCache>,
    gateway: Arc<dyn ProgressGateway>,
    attempted: Mutex<HashSet<(LearnerId, ContentId)>>,
}

impl ContentInitializer {
    #[must_use]
    pub fn new(cache: Arc<ProgressCache>, gateway: Arc<dyn ProgressGateway>) -> Self {
        Self {
            cache,
            gateway,
            attempted: Mutex::new(HashSet::new()),
        }
    }

    /// Make sure a progress record exists for `learner` and `item`.
    ///
    /// Runs at most one store request per pair per session. A failed attempt
    /// is not retried until [`ContentInitializer::reset`]; the caller should
    /// carry on without progress tracking for that item.
    ///
    /// # Errors
    ///
    /// - `InitError::NotReady` until the cache has been loaded for `learner`.
    /// - `InitError::Remote` when the upsert fails.
    /// - `InitError::Discarded` when the cache was reloaded mid-request.
    pub async fn ensure(
        &self,
        learner: &LearnerId,
        item: &ContentItem,
    ) -> Result<EnsureOutcome, InitError> {
        if !self.cache.is_ready_for(learner) {
            return Err(InitError::NotReady(learner.clone()));
        }

        if let Some(existing) = self
            .cache
            .get(item.id())
            .filter(|record| record.status() != ProgressStatus::NotStarted)
        {
            return Ok(EnsureOutcome::Existing(existing));
        }

        if !self
            .attempted
            .lock()
            .insert((learner.clone(), item.id().clone()))
        {
            return Ok(EnsureOutcome::AlreadyAttempted);
        }

        let generation = self.cache.generation();
        let stored = self
            .gateway
            .upsert_progress(NewProgress::for_item(learner.clone(), item))
            .await
            .map_err(|err| {
                tracing::warn!(
                    learner = %learner,
                    content = %item.id(),
                    error = %err,
                    "progress initialization failed; continuing untracked"
                );
                InitError::Remote(err)
            })?;

        if !self
            .cache
            .apply_in(generation, CacheMutation::Upsert(stored.clone()))
        {
            return Err(InitError::Discarded(item.id().clone()));
        }

        tracing::debug!(content = %item.id(), status = %stored.status(), "progress record ensured");
        Ok(EnsureOutcome::Upserted(stored))
    }

    /// Forget every attempt, e.g. when a new learner session starts.
    pub fn reset(&self) {
        self.attempted.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::cache::LoadStatus;
    use crate::progress::test_support::{FlakyGateway, concept, learner};
    use std::sync::atomic::Ordering;

    async fn setup() -> (Arc<FlakyGateway>, Arc<ProgressCache>, ContentInitializer) {
        let gateway = Arc::new(FlakyGateway::new());
        let cache = Arc::new(ProgressCache::new());
        cache.load(gateway.as_ref(), learner()).await;
        let init = ContentInitializer::new(
            Arc::clone(&cache),
            Arc::clone(&gateway) as Arc<dyn ProgressGateway>,
        );
        (gateway, cache, init)
    }

    #[tokio::test]
    async fn creates_in_progress_record_on_first_encounter() {
        let (gateway, cache, init) = setup().await;
        let item = concept("c-1", "m-1", 1);

        let outcome = init.ensure(&learner(), &item).await.unwrap();

        let EnsureOutcome::Upserted(record) = outcome else {
            panic!("expected upsert, got {outcome:?}");
        };
        assert_eq!(record.status(), ProgressStatus::InProgress);
        assert!(!record.form_completed());
        assert_eq!(cache.get(item.id()), Some(record));
        assert_eq!(gateway.rows(), 1);
    }

    #[tokio::test]
    async fn cached_record_short_circuits() {
        let (gateway, cache, init) = setup().await;
        let item = concept("c-1", "m-1", 1);
        gateway.seed(&item).await;
        cache.load(gateway.as_ref(), learner()).await;

        let outcome = init.ensure(&learner(), &item).await.unwrap();

        assert!(matches!(outcome, EnsureOutcome::Existing(_)));
        assert_eq!(gateway.upsert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_calls_create_one_record_and_one_request() {
        let (gateway, cache, init) = setup().await;
        gateway.yield_first(true);
        let item = concept("c-1", "m-1", 1);

        let (learner_a, learner_b) = (learner(), learner());
        let (a, b) = tokio::join!(init.ensure(&learner_a, &item), init.ensure(&learner_b, &item));

        assert!(matches!(a.unwrap(), EnsureOutcome::Upserted(_)));
        assert_eq!(b.unwrap(), EnsureOutcome::AlreadyAttempted);
        assert_eq!(gateway.upsert_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.rows(), 1);
        assert_eq!(cache.snapshot().records.len(), 1);
    }

    #[tokio::test]
    async fn refuses_before_learner_is_loaded() {
        let gateway = Arc::new(FlakyGateway::new());
        let cache = Arc::new(ProgressCache::new());
        let init = ContentInitializer::new(cache, gateway as Arc<dyn ProgressGateway>);

        let err = init
            .ensure(&learner(), &concept("c-1", "m-1", 1))
            .await
            .unwrap_err();
        assert_eq!(err, InitError::NotReady(learner()));
    }

    #[tokio::test]
    async fn waits_for_the_load_to_resolve() {
        let gateway = Arc::new(FlakyGateway::new());
        let cache = Arc::new(ProgressCache::new());
        let init = ContentInitializer::new(
            Arc::clone(&cache),
            Arc::clone(&gateway) as Arc<dyn ProgressGateway>,
        );
        let item = concept("c-1", "m-1", 1);
        gateway.hold_selects(true);

        let (status, during) = tokio::join!(cache.load(gateway.as_ref(), learner()), async {
            tokio::task::yield_now().await;
            let outcome = init.ensure(&learner(), &item).await;
            gateway.release_select();
            outcome
        });

        assert_eq!(status, LoadStatus::Fresh { records: 0 });
        assert_eq!(during.unwrap_err(), InitError::NotReady(learner()));
        assert_eq!(gateway.upsert_calls.load(Ordering::SeqCst), 0);

        let after = init.ensure(&learner(), &item).await.unwrap();
        let EnsureOutcome::Upserted(record) = after else {
            panic!("expected upsert, got {after:?}");
        };
        assert_eq!(cache.get(item.id()), Some(record));
    }

    #[tokio::test]
    async fn failed_attempt_is_not_retried_until_reset() {
        let (gateway, _cache, init) = setup().await;
        gateway.fail_upserts(true);
        let item = concept("c-1", "m-1", 1);

        assert!(matches!(
            init.ensure(&learner(), &item).await,
            Err(InitError::Remote(_))
        ));
        gateway.fail_upserts(false);
        assert_eq!(
            init.ensure(&learner(), &item).await.unwrap(),
            EnsureOutcome::AlreadyAttempted
        );

        init.reset();
        assert!(matches!(
            init.ensure(&learner(), &item).await.unwrap(),
            EnsureOutcome::Upserted(_)
        ));
        assert_eq!(gateway.upsert_calls.load(Ordering::SeqCst), 2);
    }
}
