//! Scrape pipeline: fetch -> parse -> fingerprint -> dedupe -> batched
//! validation -> batched upsert.
//!
//! Writes are flushed every [`UPSERT_BATCH_SIZE`] records. The window is a
//! compromise between validator throughput (100 addresses per request) and
//! write size (`raw_html` is large). The buffer is always upserted in the
//! same flush that validated it, so validator results are never lost to a
//! later failure.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::{ErrorSample, Mailbox, Source};
use crate::util;
use crate::validator::ValidationClient;

use super::{parse_mailbox_html, MailboxStore, PageFetcher, PipelineError, CURRENT_PARSER_VERSION};

/// Flush the upsert buffer every this many records.
const UPSERT_BATCH_SIZE: usize = 20;

/// Fire the progress callback every this many processed links.
const PROGRESS_INTERVAL: u64 = 25;

/// How many error samples a run keeps (bounded tail).
pub(crate) const ERROR_SAMPLE_LIMIT: usize = 20;

/// Counters for one scrape execution.
#[derive(Debug, Default, Clone)]
pub struct ScrapeStats {
    pub found: u64,
    pub skipped: u64,
    pub updated: u64,
    pub validated: u64,
    pub failed: u64,
    /// Bounded tail of per-URL failures.
    pub errors_sample: Vec<ErrorSample>,
}

impl ScrapeStats {
    pub(crate) fn record_error(&mut self, link: &str, reason: String) {
        if self.errors_sample.len() >= ERROR_SAMPLE_LIMIT {
            self.errors_sample.remove(0);
        }
        self.errors_sample.push(ErrorSample {
            link: link.to_string(),
            reason,
        });
    }

    fn processed(&self) -> u64 {
        self.skipped + self.updated + self.failed
    }
}

pub type ProgressFn<'a> = &'a (dyn Fn(&ScrapeStats) + Send + Sync);

/// Run the scrape pipeline over a list of detail URLs.
///
/// Per-URL failures are counted and sampled; only store failures and
/// cancellation abort the run. `stats` is updated in place so callers can
/// finalize the run record even when the pipeline aborts.
#[allow(clippy::too_many_arguments)]
pub async fn scrape_and_upsert(
    fetcher: &dyn PageFetcher,
    store: &dyn MailboxStore,
    validator: Option<&dyn ValidationClient>,
    links: &[String],
    run_id: &str,
    source: Source,
    cancel: &CancellationToken,
    stats: &mut ScrapeStats,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<(), PipelineError> {
    stats.found = links.len() as u64;

    let existing = tokio::select! {
        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        res = store.fetch_all_metadata() => res.map_err(PipelineError::Fatal)?,
    };

    let mut pending: Vec<Mailbox> = Vec::new();
    let mut needs_validation: Vec<usize> = Vec::new();

    for link in links {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            res = fetcher.fetch(link) => res,
        };
        let body = match body {
            Ok(bytes) => bytes,
            Err(err) => {
                stats.failed += 1;
                stats.record_error(link, format!("fetch: {err:#}"));
                warn!(link = %link, "fetch error: {err:#}");
                fire_progress(on_progress, stats);
                continue;
            }
        };

        let mut parsed = match parse_mailbox_html(&body, link, source) {
            Ok(mailbox) => mailbox,
            Err(err) => {
                stats.failed += 1;
                stats.record_error(link, format!("parse: {err:#}"));
                warn!(link = %link, "parse error: {err:#}");
                fire_progress(on_progress, stats);
                continue;
            }
        };

        parsed.data_hash = util::fingerprint(&parsed.name, &parsed.address_raw);
        if parsed.link.is_empty() {
            parsed.link = link.clone();
        }
        parsed.crawl_run_id = run_id.to_string();
        parsed.active = true;
        parsed.raw_html = String::from_utf8_lossy(&body).into_owned();
        parsed.parser_version = CURRENT_PARSER_VERSION.to_string();
        parsed.last_parsed_at = Some(Utc::now());

        if let Some(prev) = existing.get(&parsed.link) {
            if prev.data_hash == parsed.data_hash && !prev.cmra.is_empty() {
                stats.skipped += 1;
                fire_progress(on_progress, stats);
                continue;
            }
            // Preserve ids so updates target existing documents.
            parsed.id = prev.id.clone();
        }

        if parsed.needs_validation() {
            needs_validation.push(pending.len());
        }
        pending.push(parsed);
        stats.updated += 1;

        if pending.len() >= UPSERT_BATCH_SIZE {
            flush_pending(store, validator, &mut pending, &mut needs_validation, cancel, stats)
                .await?;
        }

        fire_progress(on_progress, stats);
    }

    // Tail flush for the final partial window.
    flush_pending(store, validator, &mut pending, &mut needs_validation, cancel, stats).await?;

    if let Some(progress) = on_progress {
        progress(stats);
    }

    Ok(())
}

/// Validate the needs-validation subset of the buffer in one batch, then
/// upsert the whole buffer. A validation failure counts the subset as failed
/// but still writes the parsed fields. Shared with the iPost1 pipeline.
pub(crate) async fn flush_pending(
    store: &dyn MailboxStore,
    validator: Option<&dyn ValidationClient>,
    pending: &mut Vec<Mailbox>,
    needs_validation: &mut Vec<usize>,
    cancel: &CancellationToken,
    stats: &mut ScrapeStats,
) -> Result<(), PipelineError> {
    if pending.is_empty() {
        needs_validation.clear();
        return Ok(());
    }
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    if !needs_validation.is_empty() {
        if let Some(validator) = validator {
            let subset: Vec<Mailbox> = needs_validation
                .iter()
                .map(|&i| pending[i].clone())
                .collect();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                res = validator.validate_many(&subset) => res,
            };
            match outcome {
                Ok(validated) => {
                    for (j, &i) in needs_validation.iter().enumerate() {
                        pending[i] = validated[j].clone();
                    }
                    stats.validated += needs_validation.len() as u64;
                }
                Err(err) => {
                    stats.failed += needs_validation.len() as u64;
                    stats.record_error("", format!("batch validation: {err}"));
                    warn!(
                        count = needs_validation.len(),
                        "batch validation failed, upserting parsed fields: {err}"
                    );
                }
            }
        }
    }

    store
        .batch_upsert(pending)
        .await
        .map_err(PipelineError::Fatal)?;
    debug!(count = pending.len(), "flushed mailbox batch");
    pending.clear();
    needs_validation.clear();
    Ok(())
}

fn fire_progress(on_progress: Option<ProgressFn<'_>>, stats: &ScrapeStats) {
    if let Some(progress) = on_progress {
        let processed = stats.processed();
        if processed % PROGRESS_INTERVAL == 0 || processed == stats.found {
            progress(stats);
        }
    }
}
