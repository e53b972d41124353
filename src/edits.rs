use crate::calendar::{DayCache, DayDate};
use crate::consumer::RevisionConsumer;
use crate::models::{PageBlock, Revision};
use anyhow::{Context, Result};
use csv::Writer;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Accounts flagged as bots. One user name per line in the list file;
/// blank lines and lines starting with `#` are ignored.
#[derive(Debug, Default, Clone)]
pub struct BotList {
    names: FxHashSet<String>,
}

impl BotList {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read bot list: {}", path.display()))?;
        let list = Self::from_names(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        );
        info!(bots = list.len(), path = %path.display(), "Loaded bot list");
        Ok(list)
    }

    pub fn contains(&self, user: &str) -> bool {
        self.names.contains(user)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DayCounts {
    pub bots: u64,
    pub humans: u64,
    pub anons: u64,
}

impl DayCounts {
    pub fn total(&self) -> u64 {
        self.bots + self.humans + self.anons
    }
}

/// Counts edits per day by author class (bot, human, anonymous) and per user.
pub struct EditCountAggregator {
    bots: BotList,
    days: DayCache,
    by_day: FxHashMap<i32, DayCounts>,
    totals: DayCounts,
    /// Keyed by (user name or IP, is anonymous)
    by_user: FxHashMap<(String, bool), u64>,
    bad_timestamps: u64,
}

impl EditCountAggregator {
    pub fn new(bots: BotList) -> Self {
        Self {
            bots,
            days: DayCache::new(),
            by_day: FxHashMap::default(),
            totals: DayCounts::default(),
            by_user: FxHashMap::default(),
            bad_timestamps: 0,
        }
    }

    pub fn totals(&self) -> DayCounts {
        self.totals
    }

    pub fn day(&self, index: i32) -> DayCounts {
        self.by_day.get(&index).copied().unwrap_or_default()
    }

    pub fn user_edits(&self, user: &str, is_anonymous: bool) -> u64 {
        self.by_user
            .get(&(user.to_string(), is_anonymous))
            .copied()
            .unwrap_or(0)
    }

    pub fn bad_timestamps(&self) -> u64 {
        self.bad_timestamps
    }

    /// Writes one row per day between the first and last day with edits,
    /// including days without edits.
    pub fn write_results<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = Writer::from_writer(out);
        writer.write_record(["index", "date", "bots", "humans", "anons", "total"])?;

        let first = self.by_day.keys().min().copied();
        let last = self.by_day.keys().max().copied();
        if let (Some(first), Some(last)) = (first, last) {
            for index in first..=last {
                let counts = self.day(index);
                writer.write_record(&[
                    index.to_string(),
                    DayDate::from_index(index).to_string(),
                    counts.bots.to_string(),
                    counts.humans.to_string(),
                    counts.anons.to_string(),
                    counts.total().to_string(),
                ])?;
            }
        }
        writer.flush().context("Failed to write edit counts")?;
        Ok(())
    }

    /// Writes `user,ip,bot,edits` rows sorted by user name.
    pub fn write_edits_by_user<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = Writer::from_writer(out);
        writer.write_record(["user", "ip", "bot", "edits"])?;

        let mut users: Vec<_> = self.by_user.iter().collect();
        users.sort();
        for ((user, is_anonymous), edits) in users {
            let yes_no = |flag: bool| if flag { "yes" } else { "no" };
            let is_bot = !is_anonymous && self.bots.contains(user);
            writer.write_record([
                user.as_str(),
                yes_no(*is_anonymous),
                yes_no(is_bot),
                edits.to_string().as_str(),
            ])?;
        }
        writer.flush().context("Failed to write edits by user")?;
        Ok(())
    }
}

impl RevisionConsumer for EditCountAggregator {
    fn start_page_block(&mut self, _block: &PageBlock) {}

    fn process_revision(&mut self, revision: &Revision<'_>) {
        let day = match self.days.date_of(revision.timestamp) {
            Ok(date) => date.index,
            Err(e) => {
                self.bad_timestamps += 1;
                warn!(rev = revision.id, error = %e, "Revision with unusable timestamp not counted");
                return;
            }
        };

        let counts = self.by_day.entry(day).or_default();
        if revision.is_anonymous {
            counts.anons += 1;
            self.totals.anons += 1;
        } else if self.bots.contains(revision.user) {
            counts.bots += 1;
            self.totals.bots += 1;
        } else {
            counts.humans += 1;
            self.totals.humans += 1;
        }

        *self
            .by_user
            .entry((revision.user.to_string(), revision.is_anonymous))
            .or_insert(0) += 1;
    }

    fn end_page_block(&mut self) {}

    fn log_report(&self) {
        info!(
            total = self.totals.total(),
            bots = self.totals.bots,
            humans = self.totals.humans,
            anons = self.totals.anons,
            users = self.by_user.len(),
            "Edit counts"
        );
    }
}
