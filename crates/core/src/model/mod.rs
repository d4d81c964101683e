mod content_item;
mod curriculum;
mod ids;
mod progress;

pub use content_item::{ContentError, ContentItem, ContentType};
pub use curriculum::{Curriculum, NavigationTargets};
pub use ids::{ContentId, LearnerId, ParseIdError, ProgressId};
pub use progress::{
    Feedback, FeedbackRating, NewProgress, ProgressError, ProgressPatch, ProgressRecord,
    ProgressStatus,
};
