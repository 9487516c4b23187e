//! Crawl and reprocess pipelines.
//!
//! A run flows: link discovery -> fetch -> parse -> fingerprint -> dedupe ->
//! batched validation -> batched upsert -> mark-and-sweep -> stats rollup.
//! Reprocess runs skip the network and re-parse stored page bodies.

mod discovery;
mod fetcher;
pub mod ipost1;
mod jobs;
mod parser;
mod reprocess;
mod scrape;
mod service;
mod stats;
mod sweep;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Mailbox, Source};

pub use discovery::discover_links;
pub use fetcher::{HttpFetcher, PageFetcher};
pub use jobs::JobManager;
pub use parser::{parse_mailbox_html, parse_price};
pub use reprocess::{reprocess_from_store, ReprocessOptions, ReprocessStats};
pub use scrape::{scrape_and_upsert, ScrapeStats};
pub use service::Service;
pub use stats::aggregate_system_stats;
pub use sweep::mark_and_sweep;

/// Version tag of the parsing logic. Bumping it is the signal that stored
/// records need a reprocess pass.
pub const CURRENT_PARSER_VERSION: &str = "v1.1";

/// Why a pipeline stopped early. Per-URL failures are counted, not raised;
/// only store failures and cancellation abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("run cancelled")]
    Cancelled,
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// Persistence seam for the pipelines.
#[async_trait]
pub trait MailboxStore: Send + Sync {
    /// All mailboxes as full records, keyed by link.
    async fn fetch_all_map(&self) -> anyhow::Result<HashMap<String, Mailbox>>;

    /// Metadata projection (link, dataHash, cmra, rdi, id, source) keyed by
    /// link. The scrape pipeline dedupes against this; loading `raw_html`
    /// for tens of thousands of records would not fit in memory.
    async fn fetch_all_metadata(&self) -> anyhow::Result<HashMap<String, Mailbox>>;

    /// Full records for one source, keyed by link. Used by mark-and-sweep.
    async fn fetch_source_map(&self, source: Source) -> anyhow::Result<HashMap<String, Mailbox>>;

    async fn batch_upsert(&self, mailboxes: &[Mailbox]) -> anyhow::Result<()>;
}
