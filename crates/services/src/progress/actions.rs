//! Learner-initiated updates that are not part of navigation.

use std::sync::Arc;

use coach_core::model::{ContentItem, FeedbackRating, ProgressPatch, ProgressRecord};

use super::sync::SyncEngine;
use crate::error::ActionError;

pub struct LearnerActions {
    sync: Arc<SyncEngine>,
}

impl LearnerActions {
    #[must_use]
    pub fn new(sync: Arc<SyncEngine>) -> Self {
        Self { sync }
    }

    /// Record that the learner submitted the form attached to `item`.
    ///
    /// # Errors
    ///
    /// `ProgressError::FormNotAttached` for items without a form, otherwise
    /// whatever the sync engine reports.
    pub async fn mark_form_completed(
        &self,
        item: &ContentItem,
    ) -> Result<ProgressRecord, ActionError> {
        let patch = ProgressPatch::form_completed();
        patch.check_against(item)?;
        Ok(self.sync.write(item.id(), patch).await?)
    }

    /// Store a 1-5 rating with optional free text. Blank text is dropped.
    ///
    /// # Errors
    ///
    /// `ProgressError::InvalidRating` for ratings outside 1-5, otherwise
    /// whatever the sync engine reports.
    pub async fn submit_feedback(
        &self,
        item: &ContentItem,
        rating: i64,
        text: Option<String>,
    ) -> Result<ProgressRecord, ActionError> {
        let rating = FeedbackRating::new(rating)?;
        let record = self
            .sync
            .write(item.id(), ProgressPatch::feedback(rating, text))
            .await?;
        tracing::info!(content = %item.id(), rating = rating.value(), "feedback submitted");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::cache::ProgressCache;
    use crate::progress::test_support::{FlakyGateway, cid, learner, member};
    use coach_core::model::{ContentType, ProgressError};
    use coach_core::time::fixed_clock;
    use std::sync::atomic::Ordering;
    use storage::repository::ProgressGateway;

    async fn actions_over(items: &[ContentItem]) -> (Arc<FlakyGateway>, LearnerActions) {
        let gateway = Arc::new(FlakyGateway::new());
        for item in items {
            gateway.seed(item).await;
        }
        let cache = Arc::new(ProgressCache::new());
        cache.load(gateway.as_ref(), learner()).await;
        let sync = Arc::new(SyncEngine::new(
            cache,
            Arc::clone(&gateway) as Arc<dyn ProgressGateway>,
            fixed_clock(),
        ));
        (gateway, LearnerActions::new(sync))
    }

    #[tokio::test]
    async fn marks_form_on_items_with_forms() {
        let item = member("e-1", "m-1", ContentType::Exercise, 1, true);
        let (_gateway, actions) = actions_over(std::slice::from_ref(&item)).await;

        let record = actions.mark_form_completed(&item).await.unwrap();

        assert!(record.form_completed());
        assert!(!record.is_completed());
    }

    #[tokio::test]
    async fn refuses_form_flag_without_form() {
        let item = member("c-1", "m-1", ContentType::Concept, 1, false);
        let (gateway, actions) = actions_over(std::slice::from_ref(&item)).await;

        let err = actions.mark_form_completed(&item).await.unwrap_err();

        assert_eq!(
            err,
            ActionError::Progress(ProgressError::FormNotAttached(cid("c-1")))
        );
        assert_eq!(gateway.update_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn feedback_is_validated_and_trimmed() {
        let item = member("c-1", "m-1", ContentType::Concept, 1, false);
        let (gateway, actions) = actions_over(std::slice::from_ref(&item)).await;

        let err = actions.submit_feedback(&item, 6, None).await.unwrap_err();
        assert_eq!(err, ActionError::Progress(ProgressError::InvalidRating(6)));
        assert_eq!(gateway.update_calls.load(Ordering::SeqCst), 0);

        let record = actions
            .submit_feedback(&item, 4, Some("  clear and short ".into()))
            .await
            .unwrap();
        assert_eq!(record.feedback_rating().map(FeedbackRating::value), Some(4));
        assert_eq!(record.feedback_text(), Some("clear and short"));
    }
}
