//! wdkb: single-pass processing of Wikidata history dumps
//!
//! Wikidata publishes full history dumps and daily incremental dumps as
//! MediaWiki XML, one page per entity (`Q42`, `Property:P31`) with all of
//! its revisions. This crate streams those dumps line by line, newest file
//! first, and hands the revisions to pluggable consumers:
//!
//! 1. **Scanning** -- [`parser::DumpProcessor`] recognizes page, title and
//!    revision lines with a small state machine, skips non-entity pages and
//!    revisions that were already delivered from a newer file
//! 2. **Revision consumers** -- statistics ([`stats`]), daily edit counts
//!    ([`edits`]), per-interval revision summaries ([`revstats`]) and
//!    latest-revision resolution ([`latest`])
//! 3. **Entity processors** -- the resolver decodes the newest revision of
//!    each entity once and passes the snapshot to the KB writer ([`kb`]),
//!    the Turtle writer ([`turtle`]) and the database writer ([`dbwriter`])
//!
//! # Key Modules
//!
//! - [`parser`] -- Line scanner and event dispatch
//! - [`source`] -- Discovery of local dump and daily directories
//! - [`membership`] -- Seen entities and revisions
//! - [`decode`] -- Revision payload decoding with memoization
//! - [`consumer`] -- Revision consumer and entity processor traits
//! - [`calendar`] -- Day indices since 2012-01-01
//! - [`store`] -- SQLite persistence with revision-guarded upserts
//! - [`history`] -- Daily totals from recorded revision statistics
//! - [`filter`] -- Language, site and property type selection for exports
//! - [`output`] -- Plain or bzip2 compressed output files
//! - [`models`] -- Entity ids, revisions and decoded snapshots
//! - [`config`] -- Constants
//!
//! # Example Usage
//!
//! ```bash
//! # Daily edit counts over all dumps in data/
//! wdkb edits --bots bots.txt
//!
//! # Compressed Turtle export restricted to English and German
//! wdkb export --turtle results/wikidata.ttl.bz2 --languages en,de
//! ```

pub mod calendar;
pub mod config;
pub mod consumer;
pub mod dbwriter;
pub mod decode;
pub mod edits;
pub mod filter;
pub mod history;
pub mod kb;
pub mod latest;
pub mod membership;
pub mod models;
pub mod output;
pub mod parser;
pub mod revstats;
pub mod source;
pub mod stats;
pub mod store;
pub mod turtle;
