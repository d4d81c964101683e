//! Built-in sample curriculum used by the seed binary and tests.

use coach_core::model::{ContentId, ContentItem, ContentType};

use crate::repository::{ContentRepository, StorageError};

struct Entry {
    id: &'static str,
    content_type: ContentType,
    milestone: Option<&'static str>,
    sequence: u32,
    title: &'static str,
    has_form: bool,
}

const ENTRIES: &[Entry] = &[
    Entry {
        id: "m-foundations",
        content_type: ContentType::Milestone,
        milestone: None,
        sequence: 1,
        title: "Coaching Foundations",
        has_form: false,
    },
    Entry {
        id: "c-what-is-coaching",
        content_type: ContentType::Concept,
        milestone: Some("m-foundations"),
        sequence: 1,
        title: "What coaching is",
        has_form: false,
    },
    Entry {
        id: "e-values-map",
        content_type: ContentType::Exercise,
        milestone: Some("m-foundations"),
        sequence: 2,
        title: "Map your values",
        has_form: true,
    },
    Entry {
        id: "e-listening-log",
        content_type: ContentType::Exercise,
        milestone: Some("m-foundations"),
        sequence: 3,
        title: "Listening log",
        has_form: false,
    },
    Entry {
        id: "m-practice",
        content_type: ContentType::Milestone,
        milestone: None,
        sequence: 2,
        title: "Into Practice",
        has_form: false,
    },
    Entry {
        id: "c-powerful-questions",
        content_type: ContentType::Concept,
        milestone: Some("m-practice"),
        sequence: 1,
        title: "Powerful questions",
        has_form: false,
    },
    Entry {
        id: "ch-first-session",
        content_type: ContentType::Challenge,
        milestone: Some("m-practice"),
        sequence: 2,
        title: "Run a first session",
        has_form: true,
    },
];

fn slugify(title: &str) -> String {
    title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// The sample curriculum: two milestones, concepts, exercises and a challenge.
///
/// # Errors
///
/// Returns `coach_core::Error` if an entry is malformed.
pub fn demo_curriculum() -> Result<Vec<ContentItem>, coach_core::Error> {
    ENTRIES
        .iter()
        .map(|entry| {
            let milestone = entry.milestone.map(ContentId::new).transpose()?;
            let item = ContentItem::new(
                ContentId::new(entry.id)?,
                entry.content_type,
                milestone,
                entry.sequence,
                entry.title,
                slugify(entry.title),
                entry.has_form,
            )?;
            Ok(item)
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SeedError {
    #[error(transparent)]
    Model(#[from] coach_core::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Upsert the sample curriculum into `content`, returning the number of items written.
///
/// # Errors
///
/// Returns `SeedError` if the curriculum is invalid or a write fails.
pub async fn seed_demo_curriculum(content: &dyn ContentRepository) -> Result<usize, SeedError> {
    let items = demo_curriculum()?;
    for item in &items {
        content.upsert_content(item).await?;
    }
    tracing::info!(items = items.len(), "seeded demo curriculum");
    Ok(items.len())
}
