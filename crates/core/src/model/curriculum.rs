use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::content_item::{ContentError, ContentItem};
use crate::model::ids::ContentId;

/// Neighbours of a content item on the learning path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationTargets {
    pub previous: Option<ContentId>,
    pub next: Option<ContentId>,
}

/// The loaded curriculum: every content item, ordered as a learning path.
///
/// The path visits milestones by sequence; each milestone is followed by its
/// member items, also by sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Curriculum {
    path: Vec<ContentItem>,
    index: HashMap<ContentId, usize>,
}

impl Curriculum {
    /// Build a curriculum from an unordered item list.
    ///
    /// # Errors
    ///
    /// Returns `ContentError::DuplicateId` for repeated ids and
    /// `ContentError::UnknownMilestone` for items whose parent is missing or
    /// not a milestone.
    pub fn new(items: Vec<ContentItem>) -> Result<Self, ContentError> {
        let mut milestones: Vec<ContentItem> = Vec::new();
        let mut members: HashMap<ContentId, Vec<ContentItem>> = HashMap::new();
        let mut seen: HashSet<ContentId> = HashSet::with_capacity(items.len());

        for item in items {
            if !seen.insert(item.id().clone()) {
                return Err(ContentError::DuplicateId(item.id().clone()));
            }
            match item.milestone_id() {
                None => milestones.push(item),
                Some(parent) => members.entry(parent.clone()).or_default().push(item),
            }
        }

        milestones.sort_by(|a, b| (a.sequence(), a.id()).cmp(&(b.sequence(), b.id())));

        let mut path = Vec::with_capacity(seen.len());
        for milestone in milestones {
            let mut group = members.remove(milestone.id()).unwrap_or_default();
            group.sort_by(|a, b| (a.sequence(), a.id()).cmp(&(b.sequence(), b.id())));
            path.push(milestone);
            path.extend(group);
        }

        if let Some((parent, orphans)) = members.into_iter().next() {
            let item = orphans
                .first()
                .map(|orphan| orphan.id().clone())
                .unwrap_or_else(|| parent.clone());
            return Err(ContentError::UnknownMilestone {
                item,
                milestone: parent,
            });
        }

        let index = path
            .iter()
            .enumerate()
            .map(|(pos, item)| (item.id().clone(), pos))
            .collect();

        Ok(Self { path, index })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.path.len()
    }

    #[must_use]
    pub fn get(&self, id: &ContentId) -> Option<&ContentItem> {
        self.index.get(id).map(|&pos| &self.path[pos])
    }

    /// Items in path order.
    #[must_use]
    pub fn path(&self) -> &[ContentItem] {
        &self.path
    }

    pub fn milestones(&self) -> impl Iterator<Item = &ContentItem> {
        self.path.iter().filter(|item| item.is_milestone())
    }

    /// Non-milestone members of `milestone`, in sequence order.
    pub fn members_of<'a>(
        &'a self,
        milestone: &'a ContentId,
    ) -> impl Iterator<Item = &'a ContentItem> + 'a {
        self.path.iter().filter(move |item| item.belongs_to(milestone))
    }

    #[must_use]
    pub fn targets_for(&self, id: &ContentId) -> NavigationTargets {
        let Some(&pos) = self.index.get(id) else {
            return NavigationTargets::default();
        };
        NavigationTargets {
            previous: pos
                .checked_sub(1)
                .map(|prev| self.path[prev].id().clone()),
            next: self.path.get(pos + 1).map(|item| item.id().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::content_item::ContentType;

    fn cid(s: &str) -> ContentId {
        ContentId::new(s).unwrap()
    }

    fn milestone(id: &str, seq: u32) -> ContentItem {
        ContentItem::new(cid(id), ContentType::Milestone, None, seq, id, id, false).unwrap()
    }

    fn member(id: &str, parent: &str, seq: u32) -> ContentItem {
        ContentItem::new(
            cid(id),
            ContentType::Concept,
            Some(cid(parent)),
            seq,
            id,
            id,
            false,
        )
        .unwrap()
    }

    fn sample() -> Curriculum {
        Curriculum::new(vec![
            member("b-2", "m-b", 2),
            member("a-1", "m-a", 1),
            milestone("m-b", 2),
            member("b-1", "m-b", 1),
            milestone("m-a", 1),
        ])
        .unwrap()
    }

    #[test]
    fn path_orders_milestones_then_members() {
        let curriculum = sample();
        let ids: Vec<&str> = curriculum.path().iter().map(|i| i.id().as_str()).collect();
        assert_eq!(ids, ["m-a", "a-1", "m-b", "b-1", "b-2"]);
    }

    #[test]
    fn targets_cross_milestone_boundaries() {
        let curriculum = sample();
        let targets = curriculum.targets_for(&cid("a-1"));
        assert_eq!(targets.previous, Some(cid("m-a")));
        assert_eq!(targets.next, Some(cid("m-b")));

        let last = curriculum.targets_for(&cid("b-2"));
        assert_eq!(last.next, None);
        assert_eq!(curriculum.targets_for(&cid("missing")), NavigationTargets::default());
    }

    #[test]
    fn members_exclude_the_milestone_itself() {
        let curriculum = sample();
        let milestone = cid("m-b");
        let members: Vec<&str> = curriculum
            .members_of(&milestone)
            .map(|i| i.id().as_str())
            .collect();
        assert_eq!(members, ["b-1", "b-2"]);
    }

    #[test]
    fn rejects_orphans_and_duplicates() {
        let orphan = Curriculum::new(vec![member("x-1", "m-x", 1)]).unwrap_err();
        assert!(matches!(orphan, ContentError::UnknownMilestone { .. }));

        let dup = Curriculum::new(vec![milestone("m-a", 1), milestone("m-a", 2)]).unwrap_err();
        assert_eq!(dup, ContentError::DuplicateId(cid("m-a")));
    }
}
