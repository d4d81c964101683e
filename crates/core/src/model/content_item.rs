use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::ContentId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContentError {
    #[error("content title cannot be empty")]
    EmptyTitle,

    #[error("content slug cannot be empty")]
    EmptySlug,

    #[error("milestone {0} cannot belong to another milestone")]
    NestedMilestone(ContentId),

    #[error("content item {0} must belong to a milestone")]
    MissingMilestone(ContentId),

    #[error("milestone {0} cannot carry a form")]
    MilestoneWithForm(ContentId),

    #[error("unknown content type: {0}")]
    UnknownType(String),

    #[error("content item {0} appears more than once")]
    DuplicateId(ContentId),

    #[error("content item {item} references unknown milestone {milestone}")]
    UnknownMilestone { item: ContentId, milestone: ContentId },
}

//
// ─── CONTENT TYPE ──────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Concept,
    Exercise,
    Challenge,
    Milestone,
}

impl ContentType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Concept => "concept",
            ContentType::Exercise => "exercise",
            ContentType::Challenge => "challenge",
            ContentType::Milestone => "milestone",
        }
    }

    #[must_use]
    pub fn is_milestone(self) -> bool {
        matches!(self, ContentType::Milestone)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "concept" => Ok(ContentType::Concept),
            "exercise" => Ok(ContentType::Exercise),
            "challenge" => Ok(ContentType::Challenge),
            "milestone" => Ok(ContentType::Milestone),
            other => Err(ContentError::UnknownType(other.to_owned())),
        }
    }
}

//
// ─── CONTENT ITEM ──────────────────────────────────────────────────────────────
//

/// One curriculum unit. Authored elsewhere; read-only to the progress subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentItem {
    id: ContentId,
    content_type: ContentType,
    milestone_id: Option<ContentId>,
    sequence: u32,
    title: String,
    slug: String,
    has_form: bool,
}

impl ContentItem {
    /// Build a validated content item.
    ///
    /// Milestones must not have a parent and never carry a form; every other
    /// type must name its parent milestone.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` if the title or slug are blank or the parent
    /// relationship does not match the content type.
    pub fn new(
        id: ContentId,
        content_type: ContentType,
        milestone_id: Option<ContentId>,
        sequence: u32,
        title: impl Into<String>,
        slug: impl Into<String>,
        has_form: bool,
    ) -> Result<Self, ContentError> {
        let title = title.into().trim().to_owned();
        let slug = slug.into().trim().to_owned();
        if title.is_empty() {
            return Err(ContentError::EmptyTitle);
        }
        if slug.is_empty() {
            return Err(ContentError::EmptySlug);
        }

        match (content_type.is_milestone(), milestone_id.is_some()) {
            (true, true) => return Err(ContentError::NestedMilestone(id)),
            (false, false) => return Err(ContentError::MissingMilestone(id)),
            _ => {}
        }
        if content_type.is_milestone() && has_form {
            return Err(ContentError::MilestoneWithForm(id));
        }

        Ok(Self {
            id,
            content_type,
            milestone_id,
            sequence,
            title,
            slug,
            has_form,
        })
    }

    #[must_use]
    pub fn id(&self) -> &ContentId {
        &self.id
    }

    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Parent milestone; `None` only for milestone items.
    #[must_use]
    pub fn milestone_id(&self) -> Option<&ContentId> {
        self.milestone_id.as_ref()
    }

    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    #[must_use]
    pub fn has_form(&self) -> bool {
        self.has_form
    }

    #[must_use]
    pub fn is_milestone(&self) -> bool {
        self.content_type.is_milestone()
    }

    /// True when this item is a non-milestone member of `milestone`.
    #[must_use]
    pub fn belongs_to(&self, milestone: &ContentId) -> bool {
        !self.is_milestone() && self.milestone_id.as_ref() == Some(milestone)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(s: &str) -> ContentId {
        ContentId::new(s).unwrap()
    }

    #[test]
    fn exercise_requires_parent_milestone() {
        let err = ContentItem::new(
            cid("ex-1"),
            ContentType::Exercise,
            None,
            1,
            "Exercise",
            "exercise",
            false,
        )
        .unwrap_err();
        assert_eq!(err, ContentError::MissingMilestone(cid("ex-1")));
    }

    #[test]
    fn milestone_rejects_parent_and_form() {
        let nested = ContentItem::new(
            cid("m-2"),
            ContentType::Milestone,
            Some(cid("m-1")),
            1,
            "Milestone",
            "milestone",
            false,
        );
        assert!(matches!(nested, Err(ContentError::NestedMilestone(_))));

        let with_form = ContentItem::new(
            cid("m-2"),
            ContentType::Milestone,
            None,
            1,
            "Milestone",
            "milestone",
            true,
        );
        assert!(matches!(with_form, Err(ContentError::MilestoneWithForm(_))));
    }

    #[test]
    fn belongs_to_ignores_milestone_items() {
        let milestone = ContentItem::new(
            cid("m-1"),
            ContentType::Milestone,
            None,
            1,
            "Foundations",
            "foundations",
            false,
        )
        .unwrap();
        let concept = ContentItem::new(
            cid("c-1"),
            ContentType::Concept,
            Some(cid("m-1")),
            1,
            "Why coaching",
            "why-coaching",
            false,
        )
        .unwrap();

        assert!(concept.belongs_to(milestone.id()));
        assert!(!milestone.belongs_to(milestone.id()));
    }

    #[test]
    fn content_type_round_trips_storage_encoding() {
        for ty in [
            ContentType::Concept,
            ContentType::Exercise,
            ContentType::Challenge,
            ContentType::Milestone,
        ] {
            assert_eq!(ty.as_str().parse::<ContentType>().unwrap(), ty);
        }
        assert!("lesson".parse::<ContentType>().is_err());
    }
}
