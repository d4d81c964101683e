use std::sync::Arc;

use coach_core::model::{ContentId, ContentItem, Curriculum, LearnerId, ProgressRecord};
use storage::repository::Storage;

use crate::Clock;
use crate::error::{AggregatorError, CoachServicesError};
use crate::progress::{
    Advance, ContentInitializer, Destination, EnsureOutcome, LearnerActions, LoadStatus,
    MilestoneAggregator, MilestoneOutcome, MilestoneStatus, MilestoneWatch, NavigationController,
    ProgressCache, ProgressSnapshot, ProgressSummary, SyncEngine,
};

/// Assembles the progress components over one `Storage` and owns the
/// learner session lifecycle.
#[derive(Clone)]
pub struct CoachServices {
    storage: Storage,
    cache: Arc<ProgressCache>,
    sync: Arc<SyncEngine>,
    initializer: Arc<ContentInitializer>,
    aggregator: Arc<MilestoneAggregator>,
    navigation: Arc<NavigationController>,
    actions: Arc<LearnerActions>,
}

impl CoachServices {
    #[must_use]
    pub fn new(storage: Storage, clock: Clock) -> Self {
        let cache = Arc::new(ProgressCache::new());
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&cache),
            Arc::clone(&storage.progress),
            clock,
        ));
        let initializer = Arc::new(ContentInitializer::new(
            Arc::clone(&cache),
            Arc::clone(&storage.progress),
        ));
        let aggregator = Arc::new(MilestoneAggregator::new(
            Arc::clone(&cache),
            Arc::clone(&sync),
            Arc::clone(&initializer),
        ));
        let navigation = Arc::new(NavigationController::new(
            Arc::clone(&cache),
            Arc::clone(&sync),
        ));
        let actions = Arc::new(LearnerActions::new(Arc::clone(&sync)));

        Self {
            storage,
            cache,
            sync,
            initializer,
            aggregator,
            navigation,
            actions,
        }
    }

    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `CoachServicesError::Sqlite` if the database cannot be opened
    /// or migrated.
    pub async fn new_sqlite(db_url: &str, clock: Clock) -> Result<Self, CoachServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::new(storage, clock))
    }

    /// Fetch content metadata and hand the validated curriculum to the
    /// aggregator.
    ///
    /// # Errors
    ///
    /// Storage failures, or `ContentError` when the rows do not form a valid
    /// curriculum.
    pub async fn load_curriculum(&self) -> Result<Arc<Curriculum>, CoachServicesError> {
        let items = self.storage.content.select_content_meta().await?;
        let curriculum = Arc::new(Curriculum::new(items)?);
        tracing::info!(items = curriculum.len(), "curriculum loaded");
        self.aggregator.set_curriculum(Arc::clone(&curriculum));
        Ok(curriculum)
    }

    /// Start a session for `learner`: reset per-session guards, load the
    /// curriculum, then the learner's progress.
    ///
    /// A failed progress read is not an error here; check the returned
    /// status or `ProgressSnapshot::is_stale`.
    ///
    /// # Errors
    ///
    /// Fails only when the curriculum cannot be loaded.
    pub async fn open_learner(&self, learner: LearnerId) -> Result<LoadStatus, CoachServicesError> {
        self.initializer.reset();
        self.aggregator.reset();
        self.load_curriculum().await?;
        Ok(self.cache.load(self.storage.progress.as_ref(), learner).await)
    }

    /// Rerun milestone reconciliation on every progress or curriculum change
    /// until the returned handle is dropped.
    #[must_use = "dropping the watch stops it"]
    pub fn watch_milestones(&self) -> MilestoneWatch {
        self.aggregator.watch()
    }

    /// End the learner session. Writes still in flight resolve as discarded.
    pub fn close(&self) {
        self.cache.teardown();
        self.initializer.reset();
        self.aggregator.reset();
    }

    /// Look up a loaded content item.
    ///
    /// # Errors
    ///
    /// Returns `CoachServicesError::UnknownContent` if it is not in the curriculum.
    pub fn item(&self, content_id: &ContentId) -> Result<ContentItem, CoachServicesError> {
        self.aggregator
            .curriculum()
            .get(content_id)
            .cloned()
            .ok_or_else(|| CoachServicesError::UnknownContent(content_id.clone()))
    }

    /// # Errors
    ///
    /// Unknown content, or the initializer's error.
    pub async fn ensure_progress(
        &self,
        learner: &LearnerId,
        content_id: &ContentId,
    ) -> Result<EnsureOutcome, CoachServicesError> {
        let item = self.item(content_id)?;
        Ok(self.initializer.ensure(learner, &item).await?)
    }

    /// # Errors
    ///
    /// Unknown content, or the navigation controller's error.
    pub async fn advance(&self, content_id: &ContentId) -> Result<Advance, CoachServicesError> {
        let item = self.item(content_id)?;
        let targets = self.aggregator.curriculum().targets_for(content_id);
        Ok(self.navigation.advance(&item, &targets).await?)
    }

    /// # Errors
    ///
    /// Returns `CoachServicesError::UnknownContent` for ids outside the curriculum.
    pub fn skip(&self, content_id: &ContentId) -> Result<Destination, CoachServicesError> {
        self.item(content_id)?;
        let targets = self.aggregator.curriculum().targets_for(content_id);
        Ok(NavigationController::skip(&targets))
    }

    /// # Errors
    ///
    /// Returns `CoachServicesError::UnknownContent` for ids outside the curriculum.
    pub fn previous(&self, content_id: &ContentId) -> Result<Destination, CoachServicesError> {
        self.item(content_id)?;
        let targets = self.aggregator.curriculum().targets_for(content_id);
        Ok(NavigationController::previous(&targets))
    }

    /// # Errors
    ///
    /// Returns `AggregatorError::UnknownMilestone` when `milestone` is not a
    /// loaded milestone.
    pub fn milestone_status(
        &self,
        milestone: &ContentId,
    ) -> Result<MilestoneStatus, CoachServicesError> {
        let item = self.item(milestone)?;
        if !item.is_milestone() {
            return Err(AggregatorError::UnknownMilestone(milestone.clone()).into());
        }
        Ok(self.aggregator.status(milestone))
    }

    /// Complete every milestone whose members are all completed.
    pub async fn reconcile_milestones(
        &self,
    ) -> Vec<(ContentId, Result<MilestoneOutcome, AggregatorError>)> {
        self.aggregator.reconcile_all().await
    }

    /// # Errors
    ///
    /// Unknown content, or the action's error.
    pub async fn mark_form_completed(
        &self,
        content_id: &ContentId,
    ) -> Result<ProgressRecord, CoachServicesError> {
        let item = self.item(content_id)?;
        Ok(self.actions.mark_form_completed(&item).await?)
    }

    /// # Errors
    ///
    /// Unknown content, or the action's error.
    pub async fn submit_feedback(
        &self,
        content_id: &ContentId,
        rating: i64,
        text: Option<String>,
    ) -> Result<ProgressRecord, CoachServicesError> {
        let item = self.item(content_id)?;
        Ok(self.actions.submit_feedback(&item, rating, text).await?)
    }

    #[must_use]
    pub fn summary(&self) -> ProgressSummary {
        ProgressSummary::compute(&self.aggregator.curriculum(), &self.cache.snapshot())
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.cache.snapshot()
    }

    #[must_use]
    pub fn curriculum(&self) -> Arc<Curriculum> {
        self.aggregator.curriculum()
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn cache(&self) -> Arc<ProgressCache> {
        Arc::clone(&self.cache)
    }

    #[must_use]
    pub fn sync(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.sync)
    }

    #[must_use]
    pub fn aggregator(&self) -> Arc<MilestoneAggregator> {
        Arc::clone(&self.aggregator)
    }
}
