//! Milestone completion derived from member progress.
//!
//! A milestone is never completed by the learner directly. Once every member
//! item is completed, the aggregator writes `completed` to the milestone's own
//! record, at most once per milestone per session.

use std::collections::HashSet;
use std::sync::Arc;

use coach_core::model::{ContentId, ContentItem, Curriculum, ProgressPatch, ProgressRecord};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::cache::{ProgressCache, ProgressSnapshot, SubscriptionId};
use super::initializer::ContentInitializer;
use super::sync::SyncEngine;
use crate::error::AggregatorError;

/// Partition of a milestone's members by completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneStatus {
    pub milestone: ContentId,
    pub completed: Vec<ContentItem>,
    pub incomplete: Vec<ContentItem>,
}

impl MilestoneStatus {
    /// Partition the members of `milestone` using `snapshot`.
    #[must_use]
    pub fn compute(
        curriculum: &Curriculum,
        snapshot: &ProgressSnapshot,
        milestone: &ContentId,
    ) -> Self {
        let (completed, incomplete) = curriculum
            .members_of(milestone)
            .cloned()
            .partition(|item| snapshot.get(item.id()).is_some_and(ProgressRecord::is_completed));
        Self {
            milestone: milestone.clone(),
            completed,
            incomplete,
        }
    }

    /// A milestone without members is not applicable, not vacuously complete.
    #[must_use]
    pub fn is_applicable(&self) -> bool {
        !(self.completed.is_empty() && self.incomplete.is_empty())
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.is_applicable() && self.incomplete.is_empty()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.completed.len() + self.incomplete.len()
    }
}

/// What `MilestoneAggregator::reconcile` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MilestoneOutcome {
    NotApplicable,
    Incomplete { remaining: usize },
    AlreadyCompleted,
    /// Completion was attempted earlier this session; not retried.
    AlreadyAttempted,
    Completed(ProgressRecord),
}

pub struct MilestoneAggregator {
    cache: Arc<ProgressCache>,
    sync: Arc<SyncEngine>,
    initializer: Arc<ContentInitializer>,
    curriculum: RwLock<Arc<Curriculum>>,
    attempted: Mutex<HashSet<ContentId>>,
    changed: Arc<Notify>,
}

impl MilestoneAggregator {
    #[must_use]
    pub fn new(
        cache: Arc<ProgressCache>,
        sync: Arc<SyncEngine>,
        initializer: Arc<ContentInitializer>,
    ) -> Self {
        Self {
            cache,
            sync,
            initializer,
            curriculum: RwLock::new(Arc::new(Curriculum::default())),
            attempted: Mutex::new(HashSet::new()),
            changed: Arc::new(Notify::new()),
        }
    }

    #[must_use]
    pub fn curriculum(&self) -> Arc<Curriculum> {
        Arc::clone(&self.curriculum.read())
    }

    /// Swap in a new curriculum and wake the watcher, if any.
    pub fn set_curriculum(&self, curriculum: Arc<Curriculum>) {
        *self.curriculum.write() = curriculum;
        self.changed.notify_one();
    }

    #[must_use]
    pub fn status(&self, milestone: &ContentId) -> MilestoneStatus {
        MilestoneStatus::compute(&self.curriculum(), &self.cache.snapshot(), milestone)
    }

    /// Complete `milestone` if all of its members are completed.
    ///
    /// Creates the milestone's own record first when the learner has none.
    ///
    /// # Errors
    ///
    /// Returns `AggregatorError` when `milestone` is not a loaded milestone,
    /// no learner is loaded, or the initializer or sync engine fail. A failed
    /// completion still counts as attempted.
    pub async fn reconcile(
        &self,
        milestone: &ContentId,
    ) -> Result<MilestoneOutcome, AggregatorError> {
        let curriculum = self.curriculum();
        let item = curriculum
            .get(milestone)
            .filter(|item| item.is_milestone())
            .ok_or_else(|| AggregatorError::UnknownMilestone(milestone.clone()))?;

        let status = MilestoneStatus::compute(&curriculum, &self.cache.snapshot(), milestone);
        if !status.is_applicable() {
            return Ok(MilestoneOutcome::NotApplicable);
        }
        if !status.incomplete.is_empty() {
            return Ok(MilestoneOutcome::Incomplete {
                remaining: status.incomplete.len(),
            });
        }

        let own = self.cache.get(milestone);
        if own.as_ref().is_some_and(ProgressRecord::is_completed) {
            return Ok(MilestoneOutcome::AlreadyCompleted);
        }
        if !self.attempted.lock().insert(milestone.clone()) {
            return Ok(MilestoneOutcome::AlreadyAttempted);
        }

        let learner = self.cache.learner().ok_or(AggregatorError::NoLearner)?;
        if own.is_none() {
            self.initializer.ensure(&learner, item).await?;
        }

        let record = self
            .sync
            .write(milestone, ProgressPatch::complete(self.sync.now()))
            .await?;
        tracing::info!(learner = %learner, milestone = %milestone, "milestone completed");
        Ok(MilestoneOutcome::Completed(record))
    }

    /// Reconcile every milestone of the loaded curriculum.
    pub async fn reconcile_all(
        &self,
    ) -> Vec<(ContentId, Result<MilestoneOutcome, AggregatorError>)> {
        let curriculum = self.curriculum();
        let mut outcomes = Vec::new();
        for milestone in curriculum.milestones() {
            let outcome = self.reconcile(milestone.id()).await;
            outcomes.push((milestone.id().clone(), outcome));
        }
        outcomes
    }

    /// Forget completion attempts, e.g. when a new learner session starts.
    pub fn reset(&self) {
        self.attempted.lock().clear();
    }

    /// Spawn a task that reruns `reconcile_all` after every cache or
    /// curriculum change. Must be called from within a tokio runtime.
    #[must_use = "dropping the watch stops it"]
    pub fn watch(self: &Arc<Self>) -> MilestoneWatch {
        let notify = Arc::clone(&self.changed);
        let subscription = self.cache.subscribe(move |_| notify.notify_one());

        let aggregator = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                aggregator.changed.notified().await;
                for (milestone, outcome) in aggregator.reconcile_all().await {
                    if let Err(err) = outcome {
                        tracing::warn!(milestone = %milestone, error = %err, "milestone reconcile failed");
                    }
                }
            }
        });

        MilestoneWatch {
            cache: Arc::clone(&self.cache),
            subscription,
            task,
        }
    }
}

/// Handle to a running milestone watcher. Dropping it stops the watcher.
pub struct MilestoneWatch {
    cache: Arc<ProgressCache>,
    subscription: SubscriptionId,
    task: JoinHandle<()>,
}

impl MilestoneWatch {
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for MilestoneWatch {
    fn drop(&mut self) {
        self.cache.unsubscribe(self.subscription);
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::progress::test_support::{FlakyGateway, cid, concept, learner, milestone};
    use coach_core::model::ProgressStatus;
    use coach_core::time::fixed_clock;
    use std::sync::atomic::Ordering;
    use storage::repository::{ProgressGateway, StorageError};

    struct Fixture {
        gateway: Arc<FlakyGateway>,
        cache: Arc<ProgressCache>,
        aggregator: Arc<MilestoneAggregator>,
    }

    async fn fixture(completed: &[&str], started: &[&str]) -> Fixture {
        let gateway = Arc::new(FlakyGateway::new());
        let items = vec![
            milestone("m-1", 1),
            concept("a", "m-1", 1),
            concept("b", "m-1", 2),
            milestone("m-empty", 2),
        ];
        for item in &items {
            if completed.contains(&item.id().as_str()) {
                gateway.seed_completed(item).await;
            } else if started.contains(&item.id().as_str()) {
                gateway.seed(item).await;
            }
        }

        let cache = Arc::new(ProgressCache::new());
        cache.load(gateway.as_ref(), learner()).await;
        let dyn_gateway = Arc::clone(&gateway) as Arc<dyn ProgressGateway>;
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&cache),
            Arc::clone(&dyn_gateway),
            fixed_clock(),
        ));
        let initializer = Arc::new(ContentInitializer::new(Arc::clone(&cache), dyn_gateway));
        let aggregator = Arc::new(MilestoneAggregator::new(
            Arc::clone(&cache),
            sync,
            initializer,
        ));
        aggregator.set_curriculum(Arc::new(Curriculum::new(items).unwrap()));

        Fixture {
            gateway,
            cache,
            aggregator,
        }
    }

    #[tokio::test]
    async fn status_partitions_members() {
        let f = fixture(&["a"], &["b"]).await;
        let status = f.aggregator.status(&cid("m-1"));
        assert_eq!(status.completed.len(), 1);
        assert_eq!(status.incomplete[0].id(), &cid("b"));
        assert!(!status.is_complete());
    }

    #[tokio::test]
    async fn members_without_records_count_as_incomplete() {
        let f = fixture(&["a"], &[]).await;
        let outcome = f.aggregator.reconcile(&cid("m-1")).await.unwrap();
        assert_eq!(outcome, MilestoneOutcome::Incomplete { remaining: 1 });
    }

    #[tokio::test]
    async fn completes_milestone_exactly_once() {
        let f = fixture(&["a", "b"], &["m-1"]).await;

        let outcome = f.aggregator.reconcile(&cid("m-1")).await.unwrap();
        let MilestoneOutcome::Completed(record) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(record.status(), ProgressStatus::Completed);
        assert_eq!(f.gateway.update_calls.load(Ordering::SeqCst), 1);

        let again = f.aggregator.reconcile(&cid("m-1")).await.unwrap();
        assert_eq!(again, MilestoneOutcome::AlreadyCompleted);
        assert_eq!(f.gateway.update_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn creates_missing_milestone_record_before_completing() {
        let f = fixture(&["a", "b"], &[]).await;

        let outcome = f.aggregator.reconcile(&cid("m-1")).await.unwrap();

        assert!(matches!(outcome, MilestoneOutcome::Completed(_)));
        assert_eq!(f.gateway.upsert_calls.load(Ordering::SeqCst), 1);
        assert!(f.cache.get(&cid("m-1")).unwrap().is_completed());
    }

    #[tokio::test]
    async fn failed_completion_is_not_retried() {
        let f = fixture(&["a", "b"], &["m-1"]).await;
        f.gateway.fail_updates(true);

        let err = f.aggregator.reconcile(&cid("m-1")).await.unwrap_err();
        assert_eq!(
            err,
            AggregatorError::Sync(SyncError::Remote(StorageError::Conflict))
        );

        f.gateway.fail_updates(false);
        let again = f.aggregator.reconcile(&cid("m-1")).await.unwrap();
        assert_eq!(again, MilestoneOutcome::AlreadyAttempted);
        assert_eq!(f.gateway.update_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_milestone_is_not_applicable() {
        let f = fixture(&[], &[]).await;
        let outcome = f.aggregator.reconcile(&cid("m-empty")).await.unwrap();
        assert_eq!(outcome, MilestoneOutcome::NotApplicable);
        assert!(!f.aggregator.status(&cid("m-empty")).is_complete());
    }

    #[tokio::test]
    async fn non_milestone_ids_are_rejected() {
        let f = fixture(&[], &[]).await;
        let err = f.aggregator.reconcile(&cid("a")).await.unwrap_err();
        assert_eq!(err, AggregatorError::UnknownMilestone(cid("a")));
    }

    #[tokio::test]
    async fn watcher_completes_milestone_after_last_member() {
        let f = fixture(&["a"], &["b", "m-1"]).await;
        let watch = f.aggregator.watch();
        let sync = SyncEngine::new(
            Arc::clone(&f.cache),
            Arc::clone(&f.gateway) as Arc<dyn ProgressGateway>,
            fixed_clock(),
        );

        sync.write(&cid("b"), ProgressPatch::complete(sync.now()))
            .await
            .unwrap();

        for _ in 0..50 {
            if f.cache.get(&cid("m-1")).is_some_and(|r| r.is_completed()) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(f.cache.get(&cid("m-1")).unwrap().is_completed());
        watch.stop();
        assert_eq!(f.cache.subscriber_count(), 0);
    }
}
