use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::content_item::{ContentItem, ContentType};
use crate::model::ids::{ContentId, LearnerId, ProgressId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("feedback rating must be between 1 and 5, got {0}")]
    InvalidRating(i64),

    #[error("completion timestamp must be set exactly when status is completed")]
    CompletionMismatch,

    #[error("content item {0} has no attached form")]
    FormNotAttached(ContentId),

    #[error("unknown progress status: {0}")]
    UnknownStatus(String),
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Per-item advancement: `not_started → in_progress → completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl ProgressStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not_started",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
        }
    }

    #[must_use]
    pub fn is_completed(self) -> bool {
        matches!(self, ProgressStatus::Completed)
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressStatus {
    type Err = ProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(ProgressStatus::NotStarted),
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            other => Err(ProgressError::UnknownStatus(other.to_owned())),
        }
    }
}

//
// ─── FEEDBACK ──────────────────────────────────────────────────────────────────
//

/// Learner rating of a content item, 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct FeedbackRating(u8);

impl FeedbackRating {
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidRating` outside 1..=5.
    pub fn new(value: i64) -> Result<Self, ProgressError> {
        match u8::try_from(value) {
            Ok(v @ 1..=5) => Ok(Self(v)),
            _ => Err(ProgressError::InvalidRating(value)),
        }
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for FeedbackRating {
    type Error = ProgressError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FeedbackRating> for i64 {
    fn from(rating: FeedbackRating) -> Self {
        i64::from(rating.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: FeedbackRating,
    pub text: Option<String>,
}

//
// ─── PATCH ─────────────────────────────────────────────────────────────────────
//

/// Partial field set carried by one progress mutation.
///
/// `None` leaves the field unchanged. `completed_at` is only read when the
/// patch moves the record to `completed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressPatch {
    pub status: Option<ProgressStatus>,
    pub form_completed: Option<bool>,
    pub completed_at: Option<DateTime<Utc>>,
    pub feedback: Option<Feedback>,
}

impl ProgressPatch {
    /// Transition to `completed` at `at`.
    #[must_use]
    pub fn complete(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(ProgressStatus::Completed),
            completed_at: Some(at),
            ..Self::default()
        }
    }

    /// Completion used by "advance": also marks the form done when the item has one.
    #[must_use]
    pub fn complete_for(item: &ContentItem, at: DateTime<Utc>) -> Self {
        let mut patch = Self::complete(at);
        if item.has_form() {
            patch.form_completed = Some(true);
        }
        patch
    }

    #[must_use]
    pub fn form_completed() -> Self {
        Self {
            form_completed: Some(true),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn feedback(rating: FeedbackRating, text: Option<String>) -> Self {
        let text = text
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty());
        Self {
            feedback: Some(Feedback { rating, text }),
            ..Self::default()
        }
    }

    /// Reject patches that would break the form invariant for `item`.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::FormNotAttached` when the patch sets the form
    /// flag on an item without a form.
    pub fn check_against(&self, item: &ContentItem) -> Result<(), ProgressError> {
        if self.form_completed == Some(true) && !item.has_form() {
            return Err(ProgressError::FormNotAttached(item.id().clone()));
        }
        Ok(())
    }
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// Insert shape used when a learner first encounters a content item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProgress {
    pub learner_id: LearnerId,
    pub content_id: ContentId,
    pub content_type: ContentType,
    pub title: String,
    pub status: ProgressStatus,
}

impl NewProgress {
    #[must_use]
    pub fn for_item(learner_id: LearnerId, item: &ContentItem) -> Self {
        Self {
            learner_id,
            content_id: item.id().clone(),
            content_type: item.content_type(),
            title: item.title().to_owned(),
            status: ProgressStatus::InProgress,
        }
    }

    /// Materialize the row a store would insert.
    #[must_use]
    pub fn into_record(self, id: ProgressId, now: DateTime<Utc>) -> ProgressRecord {
        let completed_at = self.status.is_completed().then_some(now);
        ProgressRecord {
            id,
            learner_id: self.learner_id,
            content_id: self.content_id,
            content_type: self.content_type,
            title: self.title,
            status: self.status,
            form_completed: false,
            completed_at,
            feedback_rating: None,
            feedback_text: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One learner's state for one content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressRecord {
    id: ProgressId,
    learner_id: LearnerId,
    content_id: ContentId,
    content_type: ContentType,
    title: String,
    status: ProgressStatus,
    form_completed: bool,
    completed_at: Option<DateTime<Utc>>,
    feedback_rating: Option<FeedbackRating>,
    feedback_text: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// Rebuild a record read back from storage.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::CompletionMismatch` if `completed_at` disagrees
    /// with `status`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: ProgressId,
        learner_id: LearnerId,
        content_id: ContentId,
        content_type: ContentType,
        title: String,
        status: ProgressStatus,
        form_completed: bool,
        completed_at: Option<DateTime<Utc>>,
        feedback_rating: Option<FeedbackRating>,
        feedback_text: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, ProgressError> {
        if completed_at.is_some() != status.is_completed() {
            return Err(ProgressError::CompletionMismatch);
        }
        Ok(Self {
            id,
            learner_id,
            content_id,
            content_type,
            title,
            status,
            form_completed,
            completed_at,
            feedback_rating,
            feedback_text,
            created_at,
            updated_at,
        })
    }

    #[must_use]
    pub fn id(&self) -> ProgressId {
        self.id
    }

    #[must_use]
    pub fn learner_id(&self) -> &LearnerId {
        &self.learner_id
    }

    #[must_use]
    pub fn content_id(&self) -> &ContentId {
        &self.content_id
    }

    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn status(&self) -> ProgressStatus {
        self.status
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    #[must_use]
    pub fn form_completed(&self) -> bool {
        self.form_completed
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn feedback_rating(&self) -> Option<FeedbackRating> {
        self.feedback_rating
    }

    #[must_use]
    pub fn feedback_text(&self) -> Option<&str> {
        self.feedback_text.as_deref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Merge `patch` into this record, stamping `updated_at` with `now`.
    ///
    /// Keeps `completed_at` set exactly while the status is `completed`.
    /// Re-completing an already completed record keeps the original time.
    pub fn apply_patch(&mut self, patch: &ProgressPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.completed_at = if status.is_completed() {
                self.completed_at.or(patch.completed_at).or(Some(now))
            } else {
                None
            };
            self.status = status;
        }
        if let Some(form_completed) = patch.form_completed {
            self.form_completed = form_completed;
        }
        if let Some(feedback) = &patch.feedback {
            self.feedback_rating = Some(feedback.rating);
            self.feedback_text.clone_from(&feedback.text);
        }
        self.updated_at = now;
    }

    /// Status used by the insert policy: an existing `not_started` row is
    /// promoted to `status`, any other row is left as is.
    pub fn promote_from_not_started(&mut self, status: ProgressStatus, now: DateTime<Utc>) {
        if self.status == ProgressStatus::NotStarted && status != ProgressStatus::NotStarted {
            self.apply_patch(
                &ProgressPatch {
                    status: Some(status),
                    ..ProgressPatch::default()
                },
                now,
            );
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
