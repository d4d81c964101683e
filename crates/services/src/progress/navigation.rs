//! The "advance / skip / previous" policy for a single content item.

use std::fmt;
use std::sync::Arc;

use coach_core::model::{ContentId, ContentItem, NavigationTargets, ProgressPatch};
use serde::Serialize;

use super::cache::ProgressCache;
use super::sync::SyncEngine;
use crate::error::NavigationError;

/// Where the learner should be taken next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    Item { content_id: ContentId },
    /// Acknowledge a fresh completion before moving on to `next`.
    Accomplishment {
        completed: ContentId,
        next: Option<ContentId>,
    },
    EndOfPath,
    StartOfPath,
}

impl Destination {
    fn forward(targets: &NavigationTargets) -> Self {
        targets
            .next
            .clone()
            .map_or(Self::EndOfPath, |content_id| Self::Item { content_id })
    }

    fn backward(targets: &NavigationTargets) -> Self {
        targets
            .previous
            .clone()
            .map_or(Self::StartOfPath, |content_id| Self::Item { content_id })
    }
}

/// Dismissible notice shown instead of advancing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdvanceWarning {
    FormIncomplete { content_id: ContentId },
}

impl fmt::Display for AdvanceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FormIncomplete { content_id } => {
                write!(f, "complete the form for {content_id} before continuing")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Advance {
    Navigate { destination: Destination },
    Blocked { warning: AdvanceWarning },
}

impl Advance {
    fn to(destination: Destination) -> Self {
        Self::Navigate { destination }
    }
}

pub struct NavigationController {
    cache: Arc<ProgressCache>,
    sync: Arc<SyncEngine>,
}

impl NavigationController {
    #[must_use]
    pub fn new(cache: Arc<ProgressCache>, sync: Arc<SyncEngine>) -> Self {
        Self { cache, sync }
    }

    /// Complete `item` if needed and decide where to go next.
    ///
    /// Milestones are never completed here. An item with an unfinished form
    /// blocks without touching progress.
    ///
    /// # Errors
    ///
    /// Returns `NavigationError::Sync` when the completion write fails; the
    /// learner stays on `item`.
    pub async fn advance(
        &self,
        item: &ContentItem,
        targets: &NavigationTargets,
    ) -> Result<Advance, NavigationError> {
        if item.is_milestone() {
            return Ok(Advance::to(Destination::forward(targets)));
        }

        let record = self.cache.get(item.id());
        let form_done = record.as_ref().is_some_and(|r| r.form_completed());
        if item.has_form() && !form_done {
            let warning = AdvanceWarning::FormIncomplete {
                content_id: item.id().clone(),
            };
            tracing::debug!(content = %item.id(), "advance blocked: {warning}");
            return Ok(Advance::Blocked { warning });
        }

        if record.as_ref().is_some_and(|r| r.is_completed()) {
            return Ok(Advance::to(Destination::forward(targets)));
        }

        let patch = ProgressPatch::complete_for(item, self.sync.now());
        self.sync.write(item.id(), patch).await?;
        Ok(Advance::to(Destination::Accomplishment {
            completed: item.id().clone(),
            next: targets.next.clone(),
        }))
    }

    /// Move forward without touching progress.
    #[must_use]
    pub fn skip(targets: &NavigationTargets) -> Destination {
        Destination::forward(targets)
    }

    /// Move back without touching progress.
    #[must_use]
    pub fn previous(targets: &NavigationTargets) -> Destination {
        Destination::backward(targets)
    }
}
