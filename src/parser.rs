//! Line-oriented scanner for MediaWiki XML export files.
//!
//! The scanner does not parse XML. It recognizes the fixed line layout of
//! the dumps by literal prefixes and suffixes, which is enough to find page
//! and revision boundaries and the handful of fields that are needed.

use crate::config::PROGRESS_INTERVAL;
use crate::consumer::RevisionConsumer;
use crate::membership::MembershipTracker;
use crate::models::{EntityId, EntityKind, PageBlock, Revision};
use crate::source::DumpFile;
use crate::stats::ScanStats;
use anyhow::{bail, Context, Result};
use bzip2::read::MultiBzDecoder;
use indicatif::ProgressBar;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const PAGE_START: &[u8] = b"  <page>";
const PAGE_END: &[u8] = b"  </page>";
const REVISION_START: &[u8] = b"    <revision>";
const REVISION_END: &[u8] = b"    </revision>";
const TITLE: (&[u8], &[u8]) = (b"    <title>", b"</title>");
// Page ids have fewer leading spaces, contributor ids more.
const REVISION_ID: (&[u8], &[u8]) = (b"      <id>", b"</id>");
const TIMESTAMP: (&[u8], &[u8]) = (b"      <timestamp>", b"</timestamp>");
const USERNAME: (&[u8], &[u8]) = (b"        <username>", b"</username>");
const IP: (&[u8], &[u8]) = (b"        <ip>", b"</ip>");
const TEXT_OPEN: &[u8] = b"      <text xml:space=\"preserve\">";
const TEXT_CLOSE: &[u8] = b"</text>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    AwaitingPage,
    AwaitingTitle,
    Irrelevant,
    Relevant { in_revision: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed,
    /// Stopped early by the page limit or the stop flag
    Stopped,
}

#[derive(Default)]
struct RevisionFields {
    id: String,
    timestamp: String,
    user: String,
    is_anonymous: bool,
    content: String,
    malformed: bool,
}

impl RevisionFields {
    fn reset(&mut self) {
        self.id.clear();
        self.timestamp.clear();
        self.user.clear();
        self.is_anonymous = false;
        self.content.clear();
        self.malformed = false;
    }
}

/// Maps a page title to an entity: `Q<digits>` is an item,
/// `Property:P<digits>` a property. Returns the short title with the entity.
pub fn classify_title(title: &str) -> Option<(String, EntityId)> {
    let (short, kind) = match title.strip_prefix("Property:") {
        Some(short) => (short, EntityKind::Property),
        None => (title, EntityKind::Item),
    };
    let entity = EntityId::from_title(short).filter(|entity| entity.kind == kind)?;
    Some((short.to_string(), entity))
}

fn field<'l>(line: &'l [u8], (open, close): (&[u8], &[u8])) -> Option<&'l [u8]> {
    line.strip_prefix(open)?.strip_suffix(close)
}

fn set_field(target: &mut String, bytes: &[u8]) {
    target.clear();
    target.push_str(&String::from_utf8_lossy(bytes));
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Opens a dump file, decompressing `.bz2` files on the fly.
pub fn open_dump(path: &Path) -> Result<Box<dyn BufRead>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open dump file: {}", path.display()))?;
    let is_bz2 = path.extension().is_some_and(|ext| ext == "bz2");
    if is_bz2 {
        Ok(Box::new(BufReader::with_capacity(
            256 * 1024,
            MultiBzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(256 * 1024, file)))
    }
}

/// Scans dump files and distributes page block and revision events to the
/// registered consumers. Revisions are delivered at most once per run, even
/// if they occur in several (overlapping) dump files.
pub struct DumpProcessor<'a> {
    consumers: Vec<&'a mut dyn RevisionConsumer>,
    tracker: MembershipTracker,
    stats: ScanStats,
    state: ScanState,
    title: String,
    revision: RevisionFields,
    file_pages: u64,
    page_limit: Option<u64>,
    stop: Arc<AtomicBool>,
    progress: ProgressBar,
    newest_allowed_date: Option<String>,
    elapsed: Duration,
}

impl Default for DumpProcessor<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> DumpProcessor<'a> {
    pub fn new() -> Self {
        Self {
            consumers: Vec::new(),
            tracker: MembershipTracker::new(),
            stats: ScanStats::default(),
            state: ScanState::AwaitingPage,
            title: String::new(),
            revision: RevisionFields::default(),
            file_pages: 0,
            page_limit: None,
            stop: Arc::new(AtomicBool::new(false)),
            progress: ProgressBar::hidden(),
            newest_allowed_date: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Consumers are called in the order they are registered.
    pub fn register(&mut self, consumer: &'a mut dyn RevisionConsumer) {
        self.consumers.push(consumer);
    }

    /// Stop each file after this many pages.
    pub fn with_page_limit(mut self, limit: Option<u64>) -> Self {
        self.page_limit = limit;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Setting the returned flag makes the scanner stop before the next line.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn tracker(&self) -> &MembershipTracker {
        &self.tracker
    }

    /// Processes a dated dump file. Files must arrive newest first, since the
    /// first block of an entity is taken to hold its freshest revision.
    pub fn process_dump(&mut self, dump: &DumpFile) -> Result<ScanOutcome> {
        if let Some(newest) = &self.newest_allowed_date {
            if dump.date.as_str() > newest.as_str() {
                bail!(
                    "Dump {} is newer than the previously processed dump {}; files must be processed newest first",
                    dump.date,
                    newest
                );
            }
        }
        self.newest_allowed_date = Some(dump.date.clone());
        info!(date = %dump.date, kind = ?dump.kind, path = %dump.path.display(), "Processing dump");
        self.process_path(&dump.path)
    }

    /// The file is closed when this returns, on success or error.
    pub fn process_path(&mut self, path: &Path) -> Result<ScanOutcome> {
        let reader = open_dump(path)?;
        self.process_file(reader)
            .with_context(|| format!("Failed to process dump file: {}", path.display()))
    }

    pub fn process_file<R: BufRead>(&mut self, reader: R) -> Result<ScanOutcome> {
        let start = Instant::now();
        self.stats.files += 1;
        self.file_pages = 0;
        self.state = ScanState::AwaitingPage;

        let result = self.scan_lines(reader);

        if matches!(self.state, ScanState::Relevant { .. } | ScanState::AwaitingTitle) {
            warn!(title = %self.title, "Dump ended inside a page; block discarded");
        }
        self.state = ScanState::AwaitingPage;
        self.elapsed += start.elapsed();
        self.log_report();
        result
    }

    fn scan_lines<R: BufRead>(&mut self, mut reader: R) -> Result<ScanOutcome> {
        let mut buf = Vec::with_capacity(64 * 1024);
        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("Stop requested, ending scan");
                return Ok(ScanOutcome::Stopped);
            }
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .context("Failed to read dump line")?;
            if read == 0 {
                return Ok(ScanOutcome::Completed);
            }

            self.stats.lines += 1;
            if self.stats.lines % PROGRESS_INTERVAL == 0 {
                self.progress.tick();
                self.log_report();
            }

            if self.process_line(trim_line_end(&buf)).is_break() {
                return Ok(ScanOutcome::Stopped);
            }
        }
    }

    fn process_line(&mut self, line: &[u8]) -> ControlFlow<()> {
        if line == PAGE_START {
            return self.start_page();
        }

        match self.state {
            ScanState::AwaitingPage | ScanState::Irrelevant => {
                if line == PAGE_END {
                    self.state = ScanState::AwaitingPage;
                }
            }
            ScanState::AwaitingTitle => {
                if let Some(title) = field(line, TITLE) {
                    self.classify_page(title);
                } else if line == PAGE_END {
                    self.state = ScanState::AwaitingPage;
                }
            }
            ScanState::Relevant { in_revision } => {
                if line == PAGE_END {
                    self.end_page();
                } else if line == REVISION_START {
                    self.revision.reset();
                    self.state = ScanState::Relevant { in_revision: true };
                } else if line == REVISION_END {
                    if in_revision {
                        self.finish_revision();
                    }
                    self.state = ScanState::Relevant { in_revision: false };
                } else if in_revision {
                    self.revision_field(line);
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn start_page(&mut self) -> ControlFlow<()> {
        if let Some(limit) = self.page_limit {
            if self.file_pages >= limit {
                info!(limit, "Page limit reached");
                return ControlFlow::Break(());
            }
        }
        if matches!(self.state, ScanState::Relevant { .. }) {
            warn!(title = %self.title, "Page started before the previous one ended");
        }
        self.stats.pages += 1;
        self.file_pages += 1;
        self.title.clear();
        self.revision.reset();
        self.state = ScanState::AwaitingTitle;
        ControlFlow::Continue(())
    }

    fn classify_page(&mut self, raw_title: &[u8]) {
        let raw_title = String::from_utf8_lossy(raw_title);
        let Some((title, entity)) = classify_title(&raw_title) else {
            self.state = ScanState::Irrelevant;
            return;
        };

        let is_new = self.tracker.test_and_set_entity(entity);
        self.stats.page_blocks += 1;
        self.title = title;
        self.state = ScanState::Relevant { in_revision: false };

        let block = PageBlock {
            title: self.title.clone(),
            entity,
            is_new,
        };
        for consumer in self.consumers.iter_mut() {
            consumer.start_page_block(&block);
        }
    }

    fn revision_field(&mut self, line: &[u8]) {
        if let Some(id) = field(line, REVISION_ID) {
            set_field(&mut self.revision.id, id);
        } else if let Some(timestamp) = field(line, TIMESTAMP) {
            set_field(&mut self.revision.timestamp, timestamp);
        } else if let Some(user) = field(line, USERNAME) {
            set_field(&mut self.revision.user, user);
            self.revision.is_anonymous = false;
        } else if let Some(ip) = field(line, IP) {
            set_field(&mut self.revision.user, ip);
            self.revision.is_anonymous = true;
        } else if let Some(text) = line.strip_prefix(TEXT_OPEN) {
            match text.strip_suffix(TEXT_CLOSE) {
                Some(content) => set_field(&mut self.revision.content, content),
                None => {
                    self.revision.malformed = true;
                    warn!(
                        title = %self.title,
                        rev = %self.revision.id,
                        "Revision text does not end on its line; revision dropped"
                    );
                }
            }
        }
    }

    fn finish_revision(&mut self) {
        self.stats.revisions += 1;

        let rev_id: u64 = match self.revision.id.parse() {
            Ok(id) => id,
            Err(_) => {
                self.stats.malformed_revisions += 1;
                warn!(title = %self.title, id = %self.revision.id, "Revision without a valid id; dropped");
                return;
            }
        };

        if self.tracker.contains_revision(rev_id) {
            self.stats.duplicate_revisions += 1;
            return;
        }
        if self.revision.malformed {
            self.stats.malformed_revisions += 1;
            return;
        }

        let content = match quick_xml::escape::unescape(&self.revision.content) {
            Ok(content) => content,
            Err(e) => {
                self.stats.malformed_revisions += 1;
                warn!(title = %self.title, rev = rev_id, error = %e, "Unknown entity in revision text; revision dropped");
                return;
            }
        };
        if content.is_empty() {
            return;
        }

        let revision = Revision {
            id: rev_id,
            timestamp: &self.revision.timestamp,
            user: &self.revision.user,
            is_anonymous: self.revision.is_anonymous,
            content: &content,
        };
        for consumer in self.consumers.iter_mut() {
            consumer.process_revision(&revision);
        }
        self.tracker.test_and_set_revision(rev_id);
    }

    fn end_page(&mut self) {
        for consumer in self.consumers.iter_mut() {
            consumer.end_page_block();
        }
        self.state = ScanState::AwaitingPage;
    }

    pub fn log_report(&self) {
        info!(
            lines = self.stats.lines,
            pages = self.stats.pages,
            revisions = self.stats.revisions,
            duplicates = self.stats.duplicate_revisions,
            malformed = self.stats.malformed_revisions,
            secs = self.elapsed.as_secs_f64(),
            "Dump progress"
        );
        for consumer in &self.consumers {
            consumer.log_report();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl RevisionConsumer for Recorder {
        fn start_page_block(&mut self, block: &PageBlock) {
            self.events.push(format!(
                "start {} item={} new={}",
                block.title,
                block.is_item(),
                block.is_new
            ));
        }

        fn process_revision(&mut self, revision: &Revision<'_>) {
            self.events.push(format!(
                "rev {} {} {} anon={} {}",
                revision.id, revision.timestamp, revision.user, revision.is_anonymous, revision.content
            ));
        }

        fn end_page_block(&mut self) {
            self.events.push("end".to_string());
        }

        fn log_report(&self) {}
    }

    fn page(title: &str, revisions: &[(u64, &str, &str)]) -> String {
        let mut out = String::new();
        out.push_str("  <page>\n");
        out.push_str(&format!("    <title>{}</title>\n", title));
        out.push_str("    <ns>0</ns>\n    <id>1</id>\n");
        for (id, user, text) in revisions {
            out.push_str("    <revision>\n");
            out.push_str(&format!("      <id>{}</id>\n", id));
            out.push_str("      <timestamp>2013-05-01T10:00:00Z</timestamp>\n");
            out.push_str("      <contributor>\n");
            if user.contains('.') {
                out.push_str(&format!("        <ip>{}</ip>\n", user));
            } else {
                out.push_str(&format!("        <username>{}</username>\n", user));
                out.push_str("        <id>7</id>\n");
            }
            out.push_str("      </contributor>\n");
            out.push_str(&format!("      <text xml:space=\"preserve\">{}</text>\n", text));
            out.push_str("    </revision>\n");
        }
        out.push_str("  </page>\n");
        out
    }

    fn scan(dump: &str) -> (Vec<String>, ScanStats) {
        let mut recorder = Recorder::default();
        let stats = {
            let mut processor = DumpProcessor::new();
            processor.register(&mut recorder);
            processor.process_file(Cursor::new(dump.as_bytes())).unwrap();
            processor.stats().clone()
        };
        (recorder.events, stats)
    }

    #[test]
    fn classify_titles() {
        assert_eq!(classify_title("Q42"), Some(("Q42".to_string(), EntityId::item(42))));
        assert_eq!(
            classify_title("Property:P31"),
            Some(("P31".to_string(), EntityId::property(31)))
        );
        assert_eq!(classify_title("Qu123"), None);
        assert_eq!(classify_title("P31"), None);
        assert_eq!(classify_title("Property:Q1"), None);
        assert_eq!(classify_title("Wikidata:Main Page"), None);
        assert_eq!(classify_title("Q42/sub"), None);
    }

    #[test]
    fn emits_events_for_item_page() {
        let dump = page("Q42", &[(100, "Alice", "{&quot;label&quot;:{&quot;en&quot;:&quot;Douglas Adams&quot;}}")]);
        let (events, stats) = scan(&dump);
        assert_eq!(
            events,
            vec![
                "start Q42 item=true new=true".to_string(),
                "rev 100 2013-05-01T10:00:00Z Alice anon=false {\"label\":{\"en\":\"Douglas Adams\"}}"
                    .to_string(),
                "end".to_string(),
            ]
        );
        assert_eq!(stats.pages, 1);
        assert_eq!(stats.revisions, 1);
    }

    #[test]
    fn property_title_is_shortened() {
        let (events, _) = scan(&page("Property:P31", &[(5, "Bob", "{}")]));
        assert_eq!(events[0], "start P31 item=false new=true");
    }

    #[test]
    fn irrelevant_pages_are_skipped() {
        let dump = page("Qu123", &[(1, "Alice", "{}")]) + &page("Help:Contents", &[(2, "Bob", "x")]);
        let (events, stats) = scan(&dump);
        assert!(events.is_empty());
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.page_blocks, 0);
        assert_eq!(stats.revisions, 0);
    }

    #[test]
    fn anonymous_editor() {
        let (events, _) = scan(&page("Q1", &[(3, "127.0.0.1", "{}")]));
        assert_eq!(events[1], "rev 3 2013-05-01T10:00:00Z 127.0.0.1 anon=true {}");
    }

    #[test]
    fn duplicate_revisions_are_dropped() {
        let dump = page("Q1", &[(3, "Alice", "{}")]) + &page("Q1", &[(4, "Alice", "{}"), (3, "Alice", "{}")]);
        let (events, stats) = scan(&dump);
        assert_eq!(
            events,
            vec![
                "start Q1 item=true new=true",
                "rev 3 2013-05-01T10:00:00Z Alice anon=false {}",
                "end",
                "start Q1 item=true new=false",
                "rev 4 2013-05-01T10:00:00Z Alice anon=false {}",
                "end",
            ]
        );
        assert_eq!(stats.revisions, 3);
        assert_eq!(stats.duplicate_revisions, 1);
    }

    #[test]
    fn empty_content_is_skipped_and_not_marked() {
        let dump = page("Q1", &[(3, "Alice", "")]) + &page("Q2", &[(3, "Alice", "{}")]);
        let (events, stats) = scan(&dump);
        assert_eq!(events.len(), 5);
        assert_eq!(events[3], "rev 3 2013-05-01T10:00:00Z Alice anon=false {}");
        assert_eq!(stats.duplicate_revisions, 0);
    }

    #[test]
    fn unterminated_text_drops_revision() {
        let dump = "  <page>\n    <title>Q1</title>\n    <revision>\n      <id>9</id>\n      <text xml:space=\"preserve\">{&quot;label&quot;\n    </revision>\n    <revision>\n      <id>10</id>\n      <text xml:space=\"preserve\">{}</text>\n    </revision>\n  </page>\n";
        let (events, stats) = scan(dump);
        assert_eq!(
            events,
            vec![
                "start Q1 item=true new=true",
                "rev 10  anon=false {}",
                "end"
            ]
        );
        assert_eq!(stats.malformed_revisions, 1);
    }

    #[test]
    fn text_entities_are_unescaped() {
        let dump = page("Q1", &[(4, "Alice", "{&quot;a&quot;:&quot;x &amp; &lt;y&gt;&quot;}")]);
        let (events, _) = scan(&dump);
        assert_eq!(events[1], r#"rev 4 2013-05-01T10:00:00Z Alice anon=false {"a":"x & <y>"}"#);
    }

    #[test]
    fn unknown_text_entity_drops_revision() {
        let dump = page(
            "Q1",
            &[(5, "Alice", "{&quot;a&quot;:&quot;&bogus;&quot;}"), (4, "Alice", "{}")],
        );
        let (events, stats) = scan(&dump);
        assert_eq!(
            events,
            vec![
                "start Q1 item=true new=true",
                "rev 4 2013-05-01T10:00:00Z Alice anon=false {}",
                "end"
            ]
        );
        assert_eq!(stats.malformed_revisions, 1);
    }

    #[test]
    fn page_limit_stops_scan() {
        let dump = page("Q1", &[(1, "A", "{}")]) + &page("Q2", &[(2, "A", "{}")]);
        let mut recorder = Recorder::default();
        let outcome = {
            let mut processor = DumpProcessor::new().with_page_limit(Some(1));
            processor.register(&mut recorder);
            processor.process_file(Cursor::new(dump.as_bytes())).unwrap()
        };
        assert_eq!(outcome, ScanOutcome::Stopped);
        assert_eq!(recorder.events.len(), 3);
    }

    #[test]
    fn stop_flag_ends_scan_without_block_end() {
        let dump = page("Q1", &[(1, "A", "{}")]);
        let mut recorder = Recorder::default();
        let outcome = {
            let mut processor = DumpProcessor::new();
            processor.register(&mut recorder);
            processor.stop_handle().store(true, Ordering::Relaxed);
            processor.process_file(Cursor::new(dump.as_bytes())).unwrap()
        };
        assert_eq!(outcome, ScanOutcome::Stopped);
        assert!(recorder.events.is_empty());
    }

    #[test]
    fn consumers_called_in_registration_order() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct Tagged(&'static str, Rc<RefCell<Vec<&'static str>>>);
        impl RevisionConsumer for Tagged {
            fn start_page_block(&mut self, _block: &PageBlock) {
                self.1.borrow_mut().push(self.0);
            }
            fn process_revision(&mut self, _revision: &Revision<'_>) {}
            fn end_page_block(&mut self) {}
            fn log_report(&self) {}
        }

        let log = Rc::new(RefCell::new(Vec::new()));
        let mut first = Tagged("first", Rc::clone(&log));
        let mut second = Tagged("second", Rc::clone(&log));
        {
            let mut processor = DumpProcessor::new();
            processor.register(&mut first);
            processor.register(&mut second);
            processor
                .process_file(Cursor::new(page("Q1", &[]).as_bytes()))
                .unwrap();
        }
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn crlf_line_endings() {
        let dump = page("Q5", &[(8, "A", "{}")]).replace('\n', "\r\n");
        let (events, _) = scan(&dump);
        assert_eq!(events.len(), 3);
    }
}
