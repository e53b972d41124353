//! Discovery of previously fetched dump files in a local data directory.
//!
//! Layout: `<data>/dumpYYYYMMDD/pages-meta-history.xml.bz2` for full history
//! dumps and `<data>/dailyYYYYMMDD/pages-meta-hist-incr.xml.bz2` for daily
//! incremental dumps. Each directory may hold a `maxrevid.txt` with the
//! highest revision id it contains.

use crate::config::{
    DAILY_DIR_PREFIX, DAILY_FILE_NAME, DUMP_DIR_PREFIX, DUMP_FILE_NAME, MAXREVID_FILE_NAME,
};
use crate::parser::DumpProcessor;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};

static DUMP_DIR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(dump|daily)(\d{8})$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    Full,
    Daily,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpFile {
    /// `YYYYMMDD`; compares chronologically as a string
    pub date: String,
    pub kind: DumpKind,
    pub path: PathBuf,
    pub max_revision: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub failed: usize,
}

fn read_max_revision(dir: &Path) -> Option<u64> {
    let path = dir.join(MAXREVID_FILE_NAME);
    let text = fs::read_to_string(&path).ok()?;
    match text.trim().parse() {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(path = %path.display(), "Ignoring unreadable max revision file");
            None
        }
    }
}

pub struct DumpSource {
    data_dir: PathBuf,
}

impl DumpSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// All dump directories in the data directory whose dump file exists,
    /// in no particular order.
    pub fn available(&self) -> Result<Vec<DumpFile>> {
        let entries = fs::read_dir(&self.data_dir).with_context(|| {
            format!("Failed to read data directory: {}", self.data_dir.display())
        })?;

        let mut dumps = Vec::new();
        for entry in entries {
            let entry = entry.context("Failed to read data directory entry")?;
            let name = entry.file_name();
            let Some(caps) = name.to_str().and_then(|name| DUMP_DIR_REGEX.captures(name)) else {
                continue;
            };
            let (kind, file_name) = match &caps[1] {
                DUMP_DIR_PREFIX => (DumpKind::Full, DUMP_FILE_NAME),
                DAILY_DIR_PREFIX => (DumpKind::Daily, DAILY_FILE_NAME),
                _ => continue,
            };
            let dir = entry.path();
            let path = dir.join(file_name);
            if !path.is_file() {
                warn!(dir = %dir.display(), "Dump directory without dump file, skipping");
                continue;
            }
            dumps.push(DumpFile {
                date: caps[2].to_string(),
                kind,
                path,
                max_revision: read_max_revision(&dir),
            });
        }
        Ok(dumps)
    }

    /// Files to process, newest first: the dailies published after the
    /// latest full dump, then that dump. Without a full dump, all dailies.
    pub fn recent_dumps(&self) -> Result<Vec<DumpFile>> {
        let available = self.available()?;
        let full = available
            .iter()
            .filter(|dump| dump.kind == DumpKind::Full)
            .max_by(|a, b| a.date.cmp(&b.date))
            .cloned();

        let mut dumps: Vec<DumpFile> = available
            .into_iter()
            .filter(|dump| dump.kind == DumpKind::Daily)
            .filter(|daily| match &full {
                None => true,
                Some(full) => {
                    if daily.date <= full.date {
                        return false;
                    }
                    match (daily.max_revision, full.max_revision) {
                        (Some(daily_max), Some(full_max)) if daily_max < full_max => {
                            info!(date = %daily.date, "Daily dump is covered by the full dump, skipping");
                            false
                        }
                        _ => true,
                    }
                }
            })
            .collect();
        dumps.sort_by(|a, b| b.date.cmp(&a.date));

        match full {
            Some(full) => dumps.push(full),
            None => warn!(dir = %self.data_dir.display(), "No full history dump found, using dailies only"),
        }
        Ok(dumps)
    }

    /// Runs the processor over all recent dumps, newest first. A file that
    /// fails is logged and skipped.
    pub fn process_recent_dumps(&self, processor: &mut DumpProcessor<'_>) -> Result<RunSummary> {
        let dumps = self.recent_dumps()?;
        info!(count = dumps.len(), "Found dump files");
        Ok(process_dumps(&dumps, processor))
    }
}

/// Processes the given files in order, continuing past failing files.
pub fn process_dumps(dumps: &[DumpFile], processor: &mut DumpProcessor<'_>) -> RunSummary {
    let stop = processor.stop_handle();
    let mut summary = RunSummary::default();
    for dump in dumps {
        match processor.process_dump(dump) {
            Ok(_) => summary.processed += 1,
            Err(e) => {
                summary.failed += 1;
                error!(path = %dump.path.display(), error = %format!("{:#}", e), "Failed to process dump");
            }
        }
        if stop.load(Ordering::Relaxed) {
            info!("Stop requested, skipping remaining dumps");
            break;
        }
    }
    summary
}
