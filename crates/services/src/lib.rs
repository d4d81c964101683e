#![forbid(unsafe_code)]

mod coach_services;
pub mod error;
pub mod progress;

pub use coach_core::Clock;

pub use coach_services::CoachServices;
pub use error::{
    ActionError, AggregatorError, CoachServicesError, InitError, NavigationError, SyncError,
};
pub use progress::{
    Advance, AdvanceWarning, ContentInitializer, Destination, EnsureOutcome, LearnerActions,
    LoadStatus, MilestoneAggregator, MilestoneOutcome, MilestoneStatus, MilestoneWatch,
    NavigationController, PendingWrite, ProgressCache, ProgressSnapshot, ProgressSummary,
    SyncEngine,
};
