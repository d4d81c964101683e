//! Shared error types for the services crate.

use thiserror::Error;

use coach_core::model::{ContentError, ContentId, LearnerId, ProgressError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `SyncEngine::write`.
///
/// A failed write has already been rolled back in the cache when this is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncError {
    #[error("no cached progress for content {0}")]
    NotCached(ContentId),
    #[error("a write for content {0} is already in flight")]
    InFlight(ContentId),
    #[error("result for content {0} discarded: cache was reloaded or torn down")]
    Discarded(ContentId),
    #[error(transparent)]
    Remote(#[from] StorageError),
}

/// Errors emitted by `ContentInitializer::ensure`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum InitError {
    #[error("progress for learner {0} is not loaded yet")]
    NotReady(LearnerId),
    #[error("result for content {0} discarded: cache was reloaded or torn down")]
    Discarded(ContentId),
    #[error(transparent)]
    Remote(#[from] StorageError),
}

/// Errors emitted by `MilestoneAggregator`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum AggregatorError {
    #[error("{0} is not a milestone in the loaded curriculum")]
    UnknownMilestone(ContentId),
    #[error("no learner is loaded")]
    NoLearner,
    #[error(transparent)]
    Init(#[from] InitError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Errors emitted by `NavigationController::advance`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum NavigationError {
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Errors emitted by `LearnerActions`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ActionError {
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Errors emitted while bootstrapping or driving `CoachServices`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoachServicesError {
    #[error("unknown content item {0}")]
    UnknownContent(ContentId),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Init(#[from] InitError),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Aggregator(#[from] AggregatorError),
}
