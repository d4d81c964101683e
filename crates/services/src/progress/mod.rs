//! Client-side progress tracking: cache, sync engine and the components
//! built on top of them.

pub mod actions;
pub mod cache;
pub mod initializer;
pub mod milestone;
pub mod navigation;
pub mod summary;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use actions::LearnerActions;
pub use cache::{LoadStatus, ProgressCache, ProgressSnapshot, SubscriptionId};
pub use initializer::{ContentInitializer, EnsureOutcome};
pub use milestone::{MilestoneAggregator, MilestoneOutcome, MilestoneStatus, MilestoneWatch};
pub use navigation::{Advance, AdvanceWarning, Destination, NavigationController};
pub use summary::ProgressSummary;
pub use sync::{PendingWrite, SyncEngine};
