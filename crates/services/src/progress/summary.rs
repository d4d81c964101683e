use coach_core::model::{Curriculum, ProgressStatus};
use serde::Serialize;

use super::cache::ProgressSnapshot;

/// Per-status counts over the learner's path, milestones excluded.
///
/// Items without a record count as not started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub not_started: usize,
    pub percent_complete: f64,
}

impl ProgressSummary {
    #[must_use]
    pub fn compute(curriculum: &Curriculum, snapshot: &ProgressSnapshot) -> Self {
        let mut summary = Self::default();
        for item in curriculum.path().iter().filter(|item| !item.is_milestone()) {
            summary.total += 1;
            match snapshot.get(item.id()).map(|record| record.status()) {
                Some(ProgressStatus::Completed) => summary.completed += 1,
                Some(ProgressStatus::InProgress) => summary.in_progress += 1,
                Some(ProgressStatus::NotStarted) | None => summary.not_started += 1,
            }
        }
        if summary.total > 0 {
            #[allow(clippy::cast_precision_loss)]
            let ratio = summary.completed as f64 / summary.total as f64;
            summary.percent_complete = (ratio * 1000.0).round() / 10.0;
        }
        summary
    }
}
