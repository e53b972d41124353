//! Relational storage of reduced entity data and revision statistics.
//!
//! Both kinds of rows are written with a monotonic guard: an existing row
//! is only replaced by one with an equal or higher revision id, so the
//! order in which dump files are processed cannot make stored data older.

use crate::config::COMMIT_INTERVAL;
use crate::models::{EntityId, EntityKind};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY,
    rev INTEGER NOT NULL,
    claims TEXT, links TEXT, label TEXT, aliases TEXT, description TEXT
);
CREATE TABLE IF NOT EXISTS properties (
    id INTEGER PRIMARY KEY,
    rev INTEGER NOT NULL,
    claims TEXT, datatype TEXT, label TEXT, aliases TEXT, description TEXT
);
CREATE TABLE IF NOT EXISTS itemrevstats (
    id INTEGER NOT NULL,
    rev INTEGER NOT NULL,
    day INTEGER NOT NULL,
    langinfo TEXT, propinfo TEXT,
    stat_num INTEGER NOT NULL, stat_ref_num INTEGER NOT NULL, stat_q_num INTEGER NOT NULL,
    label_num INTEGER NOT NULL, desc_num INTEGER NOT NULL, link_num INTEGER NOT NULL,
    alias_num INTEGER NOT NULL,
    PRIMARY KEY (id, day)
);
CREATE INDEX IF NOT EXISTS idx_itemrevstats_day ON itemrevstats (day);
CREATE TABLE IF NOT EXISTS proprevstats (
    id INTEGER NOT NULL,
    rev INTEGER NOT NULL,
    day INTEGER NOT NULL,
    langinfo TEXT,
    label_num INTEGER NOT NULL, desc_num INTEGER NOT NULL, alias_num INTEGER NOT NULL,
    PRIMARY KEY (id, day)
);
";

/// Reduced data of one entity revision, as serialized JSON fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub entity: EntityId,
    pub revision: u64,
    pub claims: String,
    /// Items only
    pub links: Option<String>,
    /// Properties only
    pub datatype: Option<String>,
    pub label: String,
    pub aliases: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatCounts {
    pub statements: u32,
    pub statements_with_refs: u32,
    pub statements_with_qualifiers: u32,
    pub labels: u32,
    pub descriptions: u32,
    pub links: u32,
    pub aliases: u32,
}

/// Summary of the newest revision of an entity within one stats interval.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionStatsRecord {
    pub entity: EntityId,
    pub revision: u64,
    /// Last day index of the interval
    pub day: i32,
    pub langinfo: String,
    /// Per-property snak counts; items only
    pub propinfo: Option<String>,
    pub counts: StatCounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemStatsRow {
    pub id: u32,
    pub revision: u64,
    pub day: i32,
    pub counts: StatCounts,
}

/// Write side used by the entity writers and the statistics recorder.
pub trait EntityStore {
    /// Returns false if a newer revision was already stored.
    fn upsert_entity(&mut self, record: &EntityRecord) -> Result<bool>;

    fn current_revision(&self, entity: EntityId) -> Result<Option<u64>>;

    /// Returns false if a newer revision was already stored for the slot.
    fn upsert_revision_stats(&mut self, record: &RevisionStatsRecord) -> Result<bool>;

    fn stats_revision(&self, entity: EntityId, day: i32) -> Result<Option<u64>>;

    fn commit(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

pub struct SqliteStore {
    conn: Connection,
    pending: u32,
    in_transaction: bool,
    writes: u64,
    skipped: u64,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::with_connection(conn)?;
        info!(path = %path.display(), "Opened database");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create database tables")?;
        Ok(Self {
            conn,
            pending: 0,
            in_transaction: false,
            writes: 0,
            skipped: 0,
        })
    }

    /// Rows written and rows refused by the revision guard.
    pub fn write_counts(&self) -> (u64, u64) {
        (self.writes, self.skipped)
    }

    fn begin_write(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn finish_write(&mut self, changed: usize) -> Result<bool> {
        if changed == 0 {
            self.skipped += 1;
            return Ok(false);
        }
        self.writes += 1;
        self.pending += 1;
        if self.pending >= COMMIT_INTERVAL {
            self.commit()?;
        }
        Ok(true)
    }

    /// Calls `f` for every recorded item statistics row, ordered by day and
    /// item id.
    pub fn for_each_item_stats<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&ItemStatsRow) -> Result<()>,
    {
        let mut stmt = self.conn.prepare(
            "SELECT id, rev, day, stat_num, stat_ref_num, stat_q_num,
                    label_num, desc_num, link_num, alias_num
             FROM itemrevstats ORDER BY day ASC, id ASC",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let rev: i64 = row.get(1)?;
            let stats = ItemStatsRow {
                id: row.get(0)?,
                revision: rev as u64,
                day: row.get(2)?,
                counts: StatCounts {
                    statements: row.get(3)?,
                    statements_with_refs: row.get(4)?,
                    statements_with_qualifiers: row.get(5)?,
                    labels: row.get(6)?,
                    descriptions: row.get(7)?,
                    links: row.get(8)?,
                    aliases: row.get(9)?,
                },
            };
            f(&stats)?;
        }
        Ok(())
    }
}

impl EntityStore for SqliteStore {
    fn upsert_entity(&mut self, record: &EntityRecord) -> Result<bool> {
        self.begin_write()?;
        let id = record.entity.number;
        let rev = record.revision as i64;
        let changed = match record.entity.kind {
            EntityKind::Item => {
                let mut stmt = self.conn.prepare_cached(
                    "INSERT INTO items (id, rev, claims, links, label, aliases, description)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                        rev = excluded.rev, claims = excluded.claims, links = excluded.links,
                        label = excluded.label, aliases = excluded.aliases,
                        description = excluded.description
                     WHERE excluded.rev >= items.rev",
                )?;
                stmt.execute(params![
                    id,
                    rev,
                    record.claims,
                    record.links,
                    record.label,
                    record.aliases,
                    record.description
                ])
            }
            EntityKind::Property => {
                let mut stmt = self.conn.prepare_cached(
                    "INSERT INTO properties (id, rev, claims, datatype, label, aliases, description)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                        rev = excluded.rev, claims = excluded.claims, datatype = excluded.datatype,
                        label = excluded.label, aliases = excluded.aliases,
                        description = excluded.description
                     WHERE excluded.rev >= properties.rev",
                )?;
                stmt.execute(params![
                    id,
                    rev,
                    record.claims,
                    record.datatype,
                    record.label,
                    record.aliases,
                    record.description
                ])
            }
        }
        .with_context(|| format!("Failed to store entity {}", record.entity))?;

        if changed == 0 {
            debug!(entity = %record.entity, rev = record.revision, "Newer revision already stored");
        }
        self.finish_write(changed)
    }

    fn current_revision(&self, entity: EntityId) -> Result<Option<u64>> {
        let sql = match entity.kind {
            EntityKind::Item => "SELECT rev FROM items WHERE id = ?1",
            EntityKind::Property => "SELECT rev FROM properties WHERE id = ?1",
        };
        let rev: Option<i64> = self
            .conn
            .prepare_cached(sql)?
            .query_row([entity.number], |row| row.get(0))
            .optional()?;
        Ok(rev.map(|rev| rev as u64))
    }

    fn upsert_revision_stats(&mut self, record: &RevisionStatsRecord) -> Result<bool> {
        self.begin_write()?;
        let id = record.entity.number;
        let rev = record.revision as i64;
        let c = &record.counts;
        let changed = match record.entity.kind {
            EntityKind::Item => {
                let mut stmt = self.conn.prepare_cached(
                    "INSERT INTO itemrevstats (id, rev, day, langinfo, propinfo, stat_num,
                        stat_ref_num, stat_q_num, label_num, desc_num, link_num, alias_num)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT(id, day) DO UPDATE SET
                        rev = excluded.rev, langinfo = excluded.langinfo,
                        propinfo = excluded.propinfo, stat_num = excluded.stat_num,
                        stat_ref_num = excluded.stat_ref_num, stat_q_num = excluded.stat_q_num,
                        label_num = excluded.label_num, desc_num = excluded.desc_num,
                        link_num = excluded.link_num, alias_num = excluded.alias_num
                     WHERE excluded.rev >= itemrevstats.rev",
                )?;
                stmt.execute(params![
                    id,
                    rev,
                    record.day,
                    record.langinfo,
                    record.propinfo,
                    c.statements,
                    c.statements_with_refs,
                    c.statements_with_qualifiers,
                    c.labels,
                    c.descriptions,
                    c.links,
                    c.aliases
                ])
            }
            EntityKind::Property => {
                let mut stmt = self.conn.prepare_cached(
                    "INSERT INTO proprevstats (id, rev, day, langinfo, label_num, desc_num, alias_num)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id, day) DO UPDATE SET
                        rev = excluded.rev, langinfo = excluded.langinfo,
                        label_num = excluded.label_num, desc_num = excluded.desc_num,
                        alias_num = excluded.alias_num
                     WHERE excluded.rev >= proprevstats.rev",
                )?;
                stmt.execute(params![
                    id,
                    rev,
                    record.day,
                    record.langinfo,
                    c.labels,
                    c.descriptions,
                    c.aliases
                ])
            }
        }
        .with_context(|| {
            format!(
                "Failed to store revision statistics of {} for day {}",
                record.entity, record.day
            )
        })?;
        self.finish_write(changed)
    }

    fn stats_revision(&self, entity: EntityId, day: i32) -> Result<Option<u64>> {
        let sql = match entity.kind {
            EntityKind::Item => "SELECT rev FROM itemrevstats WHERE id = ?1 AND day = ?2",
            EntityKind::Property => "SELECT rev FROM proprevstats WHERE id = ?1 AND day = ?2",
        };
        let rev: Option<i64> = self
            .conn
            .prepare_cached(sql)?
            .query_row(params![entity.number, day], |row| row.get(0))
            .optional()?;
        Ok(rev.map(|rev| rev as u64))
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn
                .execute_batch("COMMIT")
                .context("Failed to commit database transaction")?;
            debug!(writes = self.pending, "Committed database writes");
            self.in_transaction = false;
        }
        self.pending = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.commit()?;
        info!(
            writes = self.writes,
            skipped = self.skipped,
            "Closed database"
        );
        Ok(())
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if self.in_transaction {
            if let Err(e) = self.commit() {
                warn!(error = %format!("{:#}", e), "Failed to commit pending writes on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_record(number: u32, revision: u64, label: &str) -> EntityRecord {
        EntityRecord {
            entity: EntityId::item(number),
            revision,
            claims: "[]".to_string(),
            links: Some("{}".to_string()),
            datatype: None,
            label: label.to_string(),
            aliases: "{}".to_string(),
            description: "{}".to_string(),
        }
    }

    fn stats_record(entity: EntityId, revision: u64, day: i32, statements: u32) -> RevisionStatsRecord {
        RevisionStatsRecord {
            entity,
            revision,
            day,
            langinfo: "{}".to_string(),
            propinfo: None,
            counts: StatCounts {
                statements,
                ..StatCounts::default()
            },
        }
    }

    #[test]
    fn upsert_keeps_newest_revision() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.current_revision(EntityId::item(42)).unwrap(), None);

        assert!(store.upsert_entity(&item_record(42, 10, "a")).unwrap());
        assert!(store.upsert_entity(&item_record(42, 12, "b")).unwrap());
        assert!(!store.upsert_entity(&item_record(42, 11, "c")).unwrap());
        assert!(store.upsert_entity(&item_record(42, 12, "d")).unwrap());

        assert_eq!(store.current_revision(EntityId::item(42)).unwrap(), Some(12));
        let label: String = store
            .conn
            .query_row("SELECT label FROM items WHERE id = 42", [], |row| row.get(0))
            .unwrap();
        assert_eq!(label, "d");
        assert_eq!(store.write_counts(), (3, 1));
    }

    #[test]
    fn items_and_properties_are_separate() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let property = EntityRecord {
            entity: EntityId::property(42),
            revision: 5,
            claims: "[]".to_string(),
            links: None,
            datatype: Some("wikibase-item".to_string()),
            label: "{}".to_string(),
            aliases: "{}".to_string(),
            description: "{}".to_string(),
        };
        store.upsert_entity(&property).unwrap();
        assert_eq!(store.current_revision(EntityId::property(42)).unwrap(), Some(5));
        assert_eq!(store.current_revision(EntityId::item(42)).unwrap(), None);
    }

    #[test]
    fn stats_guarded_per_day() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let q1 = EntityId::item(1);
        assert!(store.upsert_revision_stats(&stats_record(q1, 20, 13, 2)).unwrap());
        assert!(!store.upsert_revision_stats(&stats_record(q1, 19, 13, 1)).unwrap());
        assert!(store.upsert_revision_stats(&stats_record(q1, 21, 27, 3)).unwrap());

        assert_eq!(store.stats_revision(q1, 13).unwrap(), Some(20));
        assert_eq!(store.stats_revision(q1, 27).unwrap(), Some(21));
        assert_eq!(store.stats_revision(q1, 41).unwrap(), None);

        let p1 = EntityId::property(1);
        assert!(store.upsert_revision_stats(&stats_record(p1, 7, 13, 0)).unwrap());
        assert_eq!(store.stats_revision(p1, 13).unwrap(), Some(7));
    }

    #[test]
    fn item_stats_in_day_order() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.upsert_revision_stats(&stats_record(EntityId::item(2), 5, 27, 1)).unwrap();
        store.upsert_revision_stats(&stats_record(EntityId::item(1), 3, 13, 2)).unwrap();
        store.upsert_revision_stats(&stats_record(EntityId::item(1), 6, 27, 4)).unwrap();
        store.upsert_revision_stats(&stats_record(EntityId::property(1), 4, 13, 0)).unwrap();

        let mut seen = Vec::new();
        store
            .for_each_item_stats(|row| {
                seen.push((row.day, row.id, row.counts.statements));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(13, 1, 2), (27, 1, 4), (27, 2, 1)]);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("db").join("test.sqlite");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.upsert_entity(&item_record(7, 70, "x")).unwrap();
            store.close().unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.current_revision(EntityId::item(7)).unwrap(), Some(70));
    }
}
