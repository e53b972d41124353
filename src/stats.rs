use crate::consumer::RevisionConsumer;
use crate::models::{PageBlock, Revision};
use tracing::info;

/// Counters maintained by the dump scanner itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub lines: u64,
    pub pages: u64,
    /// Pages of items or properties
    pub page_blocks: u64,
    pub revisions: u64,
    pub duplicate_revisions: u64,
    pub malformed_revisions: u64,
    pub files: u64,
}

/// Lightweight page block and revision counts, split by entity kind and
/// by whether the entity was new in this run.
#[derive(Default)]
pub struct StatsCounter {
    current_is_item: bool,
    item_blocks: u64,
    property_blocks: u64,
    new_items: u64,
    new_properties: u64,
    item_revisions: u64,
    property_revisions: u64,
}

impl StatsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item_blocks(&self) -> u64 {
        self.item_blocks
    }

    pub fn property_blocks(&self) -> u64 {
        self.property_blocks
    }

    pub fn new_items(&self) -> u64 {
        self.new_items
    }

    pub fn new_properties(&self) -> u64 {
        self.new_properties
    }

    pub fn item_revisions(&self) -> u64 {
        self.item_revisions
    }

    pub fn property_revisions(&self) -> u64 {
        self.property_revisions
    }
}

impl RevisionConsumer for StatsCounter {
    fn start_page_block(&mut self, block: &PageBlock) {
        self.current_is_item = block.is_item();
        if block.is_item() {
            self.item_blocks += 1;
            if block.is_new {
                self.new_items += 1;
            }
        } else {
            self.property_blocks += 1;
            if block.is_new {
                self.new_properties += 1;
            }
        }
    }

    fn process_revision(&mut self, _revision: &Revision<'_>) {
        if self.current_is_item {
            self.item_revisions += 1;
        } else {
            self.property_revisions += 1;
        }
    }

    fn end_page_block(&mut self) {}

    fn log_report(&self) {
        info!(
            revisions = self.item_revisions,
            items = self.new_items,
            blocks = self.item_blocks,
            "Item statistics"
        );
        info!(
            revisions = self.property_revisions,
            properties = self.new_properties,
            blocks = self.property_blocks,
            "Property statistics"
        );
    }
}
