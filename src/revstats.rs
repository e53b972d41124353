use crate::calendar::{interval_end_day, interval_index, DayCache};
use crate::config::STATS_INTERVAL_DAYS;
use crate::consumer::RevisionConsumer;
use crate::decode::RevisionDecoder;
use crate::models::{EntityId, EntitySnapshot, PageBlock, Revision, Snak};
use crate::store::{EntityStore, RevisionStatsRecord, StatCounts};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Summarizes a snapshot for the statistics tables.
pub fn stats_record(
    entity: EntityId,
    revision: u64,
    day: i32,
    snapshot: &EntitySnapshot,
) -> RevisionStatsRecord {
    let alias_langs: BTreeMap<&str, usize> = snapshot
        .aliases
        .iter()
        .map(|(lang, aliases)| (lang.as_str(), aliases.len()))
        .collect();
    let langinfo = json!({
        "label": snapshot.label.keys().collect::<Vec<_>>(),
        "description": snapshot.description.keys().collect::<Vec<_>>(),
        "aliases": alias_langs,
    })
    .to_string();

    let mut counts = StatCounts {
        statements: snapshot.claims.len() as u32,
        labels: snapshot.label.len() as u32,
        descriptions: snapshot.description.len() as u32,
        aliases: snapshot.alias_count() as u32,
        ..StatCounts::default()
    };

    let propinfo = if entity.kind.is_item() {
        let mut main = BTreeMap::new();
        let mut qualifiers = BTreeMap::new();
        let mut references = BTreeMap::new();
        for statement in &snapshot.claims {
            count_property(&statement.main, &mut main);
            if !statement.qualifiers.is_empty() {
                counts.statements_with_qualifiers += 1;
                statement
                    .qualifiers
                    .iter()
                    .for_each(|snak| count_property(snak, &mut qualifiers));
            }
            if !statement.references.is_empty() {
                counts.statements_with_refs += 1;
                statement
                    .references
                    .iter()
                    .flatten()
                    .for_each(|snak| count_property(snak, &mut references));
            }
        }
        counts.links = snapshot.links.len() as u32;
        Some(json!({ "m": main, "q": qualifiers, "r": references }).to_string())
    } else {
        None
    };

    RevisionStatsRecord {
        entity,
        revision,
        day,
        langinfo,
        propinfo,
        counts,
    }
}

fn count_property(snak: &Snak, counts: &mut BTreeMap<u32, u32>) {
    *counts.entry(snak.property()).or_insert(0) += 1;
}

struct Pending {
    interval: i32,
    best: Option<(u64, String)>,
}

/// Records, for every entity and stats interval, a summary of the newest
/// revision in that interval.
pub struct RevisionStatsRecorder<'s> {
    store: &'s mut dyn EntityStore,
    days: DayCache,
    decoder: RevisionDecoder,
    block: Option<PageBlock>,
    pending: Option<Pending>,
    recorded_items: u64,
    recorded_properties: u64,
    stale: u64,
    errors: u64,
}

impl<'s> RevisionStatsRecorder<'s> {
    pub fn new(store: &'s mut dyn EntityStore) -> Self {
        Self {
            store,
            days: DayCache::new(),
            decoder: RevisionDecoder::new(),
            block: None,
            pending: None,
            recorded_items: 0,
            recorded_properties: 0,
            stale: 0,
            errors: 0,
        }
    }

    pub fn recorded(&self) -> (u64, u64) {
        (self.recorded_items, self.recorded_properties)
    }

    /// Intervals skipped because the store already had a newer revision.
    pub fn stale(&self) -> u64 {
        self.stale
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    fn flush(&mut self) {
        let Some(block) = self.block.as_ref() else {
            return;
        };
        let Some(Pending {
            interval,
            best: Some((rev_id, content)),
        }) = self.pending.take()
        else {
            return;
        };
        let day = interval_end_day(interval, STATS_INTERVAL_DAYS);

        match self.store.stats_revision(block.entity, day) {
            Ok(Some(stored)) if stored > rev_id => {
                self.stale += 1;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                self.errors += 1;
                warn!(title = %block.title, day, error = %format!("{:#}", e), "Failed to read stored statistics");
                return;
            }
        }

        let snapshot = self.decoder.decode(rev_id, &content, &block.title);
        let record = stats_record(block.entity, rev_id, day, snapshot);
        match self.store.upsert_revision_stats(&record) {
            Ok(true) if block.is_item() => self.recorded_items += 1,
            Ok(true) => self.recorded_properties += 1,
            Ok(false) => self.stale += 1,
            Err(e) => {
                self.errors += 1;
                warn!(title = %block.title, rev = rev_id, error = %format!("{:#}", e), "Failed to record statistics");
            }
        }
    }
}

impl RevisionConsumer for RevisionStatsRecorder<'_> {
    fn start_page_block(&mut self, block: &PageBlock) {
        self.block = Some(block.clone());
        self.pending = None;
    }

    fn process_revision(&mut self, revision: &Revision<'_>) {
        let day = match self.days.date_of(revision.timestamp) {
            Ok(date) => date.index,
            Err(e) => {
                warn!(rev = revision.id, error = %e, "Revision with unusable timestamp not recorded");
                return;
            }
        };
        let interval = interval_index(day, STATS_INTERVAL_DAYS);

        if self.pending.as_ref().is_some_and(|p| p.interval != interval) {
            self.flush();
        }
        let pending = self.pending.get_or_insert(Pending {
            interval,
            best: None,
        });
        let is_better = match &pending.best {
            Some((best, _)) => revision.id > *best,
            None => true,
        };
        if is_better {
            pending.best = Some((revision.id, revision.content.to_string()));
        }
    }

    fn end_page_block(&mut self) {
        self.flush();
        self.block = None;
    }

    fn log_report(&self) {
        info!(
            items = self.recorded_items,
            properties = self.recorded_properties,
            stale = self.stale,
            errors = self.errors,
            "Recorded revision statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::day_index;
    use crate::decode::parse_snapshot;
    use crate::store::SqliteStore;

    const CONTENT: &str = r#"{"label":{"en":"Douglas Adams","de":"Douglas Adams"},"description":{"en":"writer"},"aliases":{"en":["DNA","Douglas Noel Adams"]},"links":{"enwiki":"Douglas Adams"},"claims":[{"m":["value",31,"wikibase-entityid",{"entity-type":"item","numeric-id":5}],"q":[["value",580,"string","x"]],"refs":[[["value",143,"wikibase-entityid",{"entity-type":"item","numeric-id":328}],["value",143,"wikibase-entityid",{"entity-type":"item","numeric-id":48183}]]],"g":"q42$1","rank":1},{"m":["somevalue",31],"q":[],"refs":[],"g":"q42$2","rank":1}]}"#;

    fn block(entity: EntityId) -> PageBlock {
        PageBlock {
            title: entity.to_string(),
            entity,
            is_new: true,
        }
    }

    fn revision<'a>(id: u64, timestamp: &'a str, content: &'a str) -> Revision<'a> {
        Revision {
            id,
            timestamp,
            user: "Alice",
            is_anonymous: false,
            content,
        }
    }

    #[test]
    fn summary_counts() {
        let snapshot = parse_snapshot(CONTENT).unwrap().snapshot;
        let record = stats_record(EntityId::item(42), 9, 13, &snapshot);
        assert_eq!(
            record.counts,
            StatCounts {
                statements: 2,
                statements_with_refs: 1,
                statements_with_qualifiers: 1,
                labels: 2,
                descriptions: 1,
                links: 1,
                aliases: 2,
            }
        );
        assert_eq!(
            record.langinfo,
            r#"{"aliases":{"en":2},"description":["en"],"label":["de","en"]}"#
        );
        assert_eq!(
            record.propinfo.as_deref(),
            Some(r#"{"m":{"31":2},"q":{"580":1},"r":{"143":2}}"#)
        );
    }

    #[test]
    fn property_summary_has_no_propinfo() {
        let snapshot = parse_snapshot(r#"{"label":{"en":"instance of"},"datatype":"wikibase-item"}"#)
            .unwrap()
            .snapshot;
        let record = stats_record(EntityId::property(31), 3, 13, &snapshot);
        assert!(record.propinfo.is_none());
        assert_eq!(record.counts.labels, 1);
    }

    #[test]
    fn records_newest_revision_per_interval() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let q42 = EntityId::item(42);
        {
            let mut recorder = RevisionStatsRecorder::new(&mut store);
            recorder.start_page_block(&block(q42));
            // 2013-05-16 and 2013-05-06 share an interval, 2013-04-01 does not
            recorder.process_revision(&revision(30, "2013-05-16T00:00:00Z", CONTENT));
            recorder.process_revision(&revision(20, "2013-05-06T00:00:00Z", "{}"));
            recorder.process_revision(&revision(10, "2013-04-01T00:00:00Z", "{}"));
            recorder.end_page_block();
            assert_eq!(recorder.recorded(), (2, 0));
        }

        let day = |y, m, d| interval_end_day(interval_index(day_index(y, m, d), 14), 14);
        assert_eq!(day(2013, 5, 16), day(2013, 5, 6));
        assert_eq!(store.stats_revision(q42, day(2013, 5, 16)).unwrap(), Some(30));
        assert_eq!(store.stats_revision(q42, day(2013, 4, 1)).unwrap(), Some(10));
    }

    #[test]
    fn older_revision_does_not_replace_stored_one() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let q1 = EntityId::item(1);
        {
            let mut recorder = RevisionStatsRecorder::new(&mut store);
            recorder.start_page_block(&block(q1));
            recorder.process_revision(&revision(50, "2013-05-20T00:00:00Z", "{}"));
            recorder.end_page_block();
            recorder.start_page_block(&block(q1));
            recorder.process_revision(&revision(40, "2013-05-20T00:00:00Z", "{}"));
            recorder.end_page_block();
            assert_eq!(recorder.stale(), 1);
        }
        let day = interval_end_day(interval_index(day_index(2013, 5, 20), 14), 14);
        assert_eq!(store.stats_revision(q1, day).unwrap(), Some(50));
    }
}
