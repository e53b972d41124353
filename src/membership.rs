use crate::models::{EntityId, EntityKind};
use rustc_hash::FxHashSet;

/// Remembers which items, properties and revisions have been seen during a
/// run. Membership only grows; there is no removal.
#[derive(Default)]
pub struct MembershipTracker {
    items: FxHashSet<u32>,
    properties: FxHashSet<u32>,
    revisions: FxHashSet<u64>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the entity is seen for the first time and marks it seen.
    pub fn test_and_set_entity(&mut self, entity: EntityId) -> bool {
        match entity.kind {
            EntityKind::Item => self.items.insert(entity.number),
            EntityKind::Property => self.properties.insert(entity.number),
        }
    }

    pub fn contains_revision(&self, rev_id: u64) -> bool {
        self.revisions.contains(&rev_id)
    }

    /// Returns true if the revision is seen for the first time and marks it seen.
    pub fn test_and_set_revision(&mut self, rev_id: u64) -> bool {
        self.revisions.insert(rev_id)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn revision_count(&self) -> usize {
        self.revisions.len()
    }
}
