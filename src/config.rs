/// Progress report interval (log every N dump lines)
pub const PROGRESS_INTERVAL: u64 = 1_000_000;

/// Number of database writes between commits
pub const COMMIT_INTERVAL: u32 = 1000;

/// Length in days of the intervals used for revision statistics
pub const STATS_INTERVAL_DAYS: i32 = 14;

/// Day index 0 is January 1st of this year
pub const EPOCH_YEAR: i32 = 2012;

/// Directory prefix of full history dumps inside the data directory (`dump20130514/`)
pub const DUMP_DIR_PREFIX: &str = "dump";

/// Directory prefix of daily incremental dumps inside the data directory (`daily20130520/`)
pub const DAILY_DIR_PREFIX: &str = "daily";

pub const DUMP_FILE_NAME: &str = "pages-meta-history.xml.bz2";

pub const DAILY_FILE_NAME: &str = "pages-meta-hist-incr.xml.bz2";

/// Optional file holding the highest revision id contained in a dump
pub const MAXREVID_FILE_NAME: &str = "maxrevid.txt";

/// Language kept verbatim when reducing entity data for the database
pub const DB_PRESERVED_LANGUAGE: &str = "en";

pub const DEFAULT_DATA_DIR: &str = "data";

pub const DEFAULT_OUTPUT_DIR: &str = "results";

pub const DEFAULT_DATABASE_FILE: &str = "wdkb.sqlite";
