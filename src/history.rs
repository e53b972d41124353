//! Historic item statistics aggregated from the recorded revision stats.

use crate::calendar::DayDate;
use crate::store::{ItemStatsRow, SqliteStore, StatCounts};
use anyhow::{Context, Result};
use csv::Writer;
use rustc_hash::FxHashMap;
use std::io::Write;
use tracing::{debug, info};

/// Running totals as of the end of one recorded day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayTotals {
    pub day: i32,
    pub items: u64,
    pub edited_items: u64,
    pub statements: i64,
    pub statements_with_refs: i64,
    pub statements_with_qualifiers: i64,
    pub labels: i64,
    pub descriptions: i64,
    pub links: i64,
    pub aliases: i64,
}

impl DayTotals {
    fn add(&mut self, counts: &StatCounts, factor: i64) {
        self.statements += factor * i64::from(counts.statements);
        self.statements_with_refs += factor * i64::from(counts.statements_with_refs);
        self.statements_with_qualifiers += factor * i64::from(counts.statements_with_qualifiers);
        self.labels += factor * i64::from(counts.labels);
        self.descriptions += factor * i64::from(counts.descriptions);
        self.links += factor * i64::from(counts.links);
        self.aliases += factor * i64::from(counts.aliases);
    }
}

/// Replays item statistics rows in day order. When an item changes, its
/// previous row is subtracted so every day reflects the current state.
#[derive(Default)]
pub struct StatHistory {
    latest: FxHashMap<u32, StatCounts>,
    days: Vec<DayTotals>,
}

impl StatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows must arrive ordered by day.
    pub fn add_row(&mut self, row: &ItemStatsRow) {
        if self.days.last().map(|totals| totals.day) != Some(row.day) {
            let mut totals = self.days.last().copied().unwrap_or_default();
            totals.day = row.day;
            totals.edited_items = 0;
            self.days.push(totals);
            debug!(day = row.day, "Aggregating day");
        }
        let Some(totals) = self.days.last_mut() else {
            return;
        };

        match self.latest.insert(row.id, row.counts) {
            Some(previous) => totals.add(&previous, -1),
            None => totals.items += 1,
        }
        totals.add(&row.counts, 1);
        totals.edited_items += 1;
    }

    pub fn from_store(store: &SqliteStore) -> Result<Self> {
        let mut history = Self::new();
        store
            .for_each_item_stats(|row| {
                history.add_row(row);
                Ok(())
            })
            .context("Failed to read item statistics")?;
        info!(
            days = history.days.len(),
            items = history.latest.len(),
            "Aggregated item statistics"
        );
        Ok(history)
    }

    pub fn days(&self) -> &[DayTotals] {
        &self.days
    }

    pub fn write_csv<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = Writer::from_writer(out);
        writer.write_record([
            "date",
            "total items",
            "edited items",
            "statements",
            "statements w refs",
            "statements w qualifiers",
            "labels",
            "descriptions",
            "links",
            "aliases",
        ])?;
        for totals in &self.days {
            writer.write_record(&[
                DayDate::from_index(totals.day).to_string(),
                totals.items.to_string(),
                totals.edited_items.to_string(),
                totals.statements.to_string(),
                totals.statements_with_refs.to_string(),
                totals.statements_with_qualifiers.to_string(),
                totals.labels.to_string(),
                totals.descriptions.to_string(),
                totals.links.to_string(),
                totals.aliases.to_string(),
            ])?;
        }
        writer.flush().context("Failed to write statistics history")?;
        Ok(())
    }
}
