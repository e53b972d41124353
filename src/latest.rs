use crate::consumer::{EntityProcessor, RevisionConsumer};
use crate::decode::RevisionDecoder;
use crate::models::{EntityId, PageBlock, Revision};
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

struct BlockState {
    title: String,
    entity: EntityId,
    is_item: bool,
    /// Whether this block may still yield the entity's snapshot
    is_candidate: bool,
    /// Id of the previous revision delivered in this block
    previous: Option<u64>,
    best: Option<(u64, String)>,
}

/// Picks the revision with the highest id of the first block seen for every
/// entity and hands its decoded snapshot to the entity processors.
///
/// With a timestamp cutoff the first block of an entity may hold only later
/// revisions. Later blocks of that entity stay candidates until one of them
/// yields a snapshot.
pub struct LatestRevisionResolver<'a> {
    processors: Vec<&'a mut dyn EntityProcessor>,
    decoder: RevisionDecoder,
    max_timestamp: Option<String>,
    forwarded: FxHashSet<EntityId>,
    block: Option<BlockState>,
    entities_found: u64,
    order_anomalies: u64,
    processor_failures: u64,
}

impl<'a> LatestRevisionResolver<'a> {
    pub fn new() -> Self {
        Self {
            processors: Vec::new(),
            decoder: RevisionDecoder::new(),
            max_timestamp: None,
            forwarded: FxHashSet::default(),
            block: None,
            entities_found: 0,
            order_anomalies: 0,
            processor_failures: 0,
        }
    }

    /// Only revisions with a timestamp strictly before `max_timestamp` are
    /// considered. Timestamps compare as strings (`2013-05-01T00:00:00Z`),
    /// so a bare date such as `2013-05-01` works as a cutoff too.
    pub fn with_max_timestamp(mut self, max_timestamp: Option<String>) -> Self {
        self.max_timestamp = max_timestamp;
        self
    }

    pub fn register(&mut self, processor: &'a mut dyn EntityProcessor) {
        self.processors.push(processor);
    }

    pub fn entities_found(&self) -> u64 {
        self.entities_found
    }

    /// Revisions whose id was larger than the one delivered before them in
    /// the same block.
    pub fn order_anomalies(&self) -> u64 {
        self.order_anomalies
    }

    pub fn processor_failures(&self) -> u64 {
        self.processor_failures
    }

    /// Closes all registered processors, returning the first error.
    pub fn close_processors(&mut self) -> anyhow::Result<()> {
        let mut first_error = None;
        for processor in self.processors.iter_mut() {
            if let Err(e) = processor.close() {
                warn!(error = %format!("{:#}", e), "Failed to close entity processor");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for LatestRevisionResolver<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl RevisionConsumer for LatestRevisionResolver<'_> {
    fn start_page_block(&mut self, block: &PageBlock) {
        let is_candidate = match self.max_timestamp {
            Some(_) => !self.forwarded.contains(&block.entity),
            None => block.is_new,
        };
        self.block = Some(BlockState {
            title: block.title.clone(),
            entity: block.entity,
            is_item: block.is_item(),
            is_candidate,
            previous: None,
            best: None,
        });
    }

    fn process_revision(&mut self, revision: &Revision<'_>) {
        let Some(block) = self.block.as_mut() else {
            return;
        };
        if !block.is_candidate {
            return;
        }

        if let Some(previous) = block.previous {
            if revision.id > previous {
                self.order_anomalies += 1;
                debug!(
                    title = %block.title,
                    rev = revision.id,
                    previous,
                    "Revision ids not in newest-first order"
                );
            }
        }
        block.previous = Some(revision.id);

        if let Some(cutoff) = &self.max_timestamp {
            if revision.timestamp >= cutoff.as_str() {
                return;
            }
        }
        let is_better = match &block.best {
            Some((best, _)) => revision.id > *best,
            None => true,
        };
        if is_better {
            block.best = Some((revision.id, revision.content.to_string()));
        }
    }

    fn end_page_block(&mut self) {
        let Some(block) = self.block.take() else {
            return;
        };
        let Some((rev_id, content)) = block.best else {
            return;
        };

        if self.max_timestamp.is_some() {
            self.forwarded.insert(block.entity);
        }
        self.entities_found += 1;
        let snapshot = self.decoder.decode(rev_id, &content, &block.title);
        for processor in self.processors.iter_mut() {
            if let Err(e) = processor.process_entity(&block.title, rev_id, block.is_item, snapshot) {
                self.processor_failures += 1;
                warn!(
                    title = %block.title,
                    rev = rev_id,
                    error = %format!("{:#}", e),
                    "Entity processor failed"
                );
            }
        }
    }

    fn log_report(&self) {
        info!(
            entities = self.entities_found,
            parsed = self.decoder.parse_count(),
            unparseable = self.decoder.failures(),
            order_anomalies = self.order_anomalies,
            processor_failures = self.processor_failures,
            "Latest revisions"
        );
        for processor in &self.processors {
            processor.log_report();
        }
    }
}
