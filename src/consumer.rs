//! Event protocol between the dump scanner, revision consumers and entity
//! processors.
//!
//! The scanner calls, per relevant page, `start_page_block` once, then
//! `process_revision` for every new non-empty revision, then
//! `end_page_block`. Consumers are called in registration order. Borrowed
//! event data does not outlive the call.

use crate::models::{EntitySnapshot, PageBlock, Revision};
use anyhow::Result;
use tracing::debug;

pub trait RevisionConsumer {
    fn start_page_block(&mut self, block: &PageBlock);

    fn process_revision(&mut self, revision: &Revision<'_>);

    fn end_page_block(&mut self);

    /// Log progress information; called periodically by the scanner.
    fn log_report(&self);
}

/// Receives the final snapshot of every entity, at most once per run.
pub trait EntityProcessor {
    fn process_entity(
        &mut self,
        title: &str,
        revision: u64,
        is_item: bool,
        snapshot: &EntitySnapshot,
    ) -> Result<()>;

    fn log_report(&self);

    /// Flush and release outputs. Called once after the last entity.
    fn close(&mut self) -> Result<()>;
}

/// Logs every event. Produces a lot of output; for debugging only.
#[derive(Default)]
pub struct DebugLogger {
    current: Option<String>,
}

impl DebugLogger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RevisionConsumer for DebugLogger {
    fn start_page_block(&mut self, block: &PageBlock) {
        if block.is_new {
            debug!(title = %block.title, "Starting page for the first time");
        } else {
            debug!(title = %block.title, "Starting page (seen before)");
        }
        self.current = Some(block.title.clone());
    }

    fn process_revision(&mut self, revision: &Revision<'_>) {
        debug!(
            rev = revision.id,
            timestamp = revision.timestamp,
            user = revision.user,
            anonymous = revision.is_anonymous,
            "Processing revision"
        );
    }

    fn end_page_block(&mut self) {
        if let Some(title) = self.current.take() {
            debug!(title = %title, "Finished page");
        }
    }

    fn log_report(&self) {}
}
