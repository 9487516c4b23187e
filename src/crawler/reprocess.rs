//! Reprocess pipeline: re-parse stored page bodies against a newer parser
//! version without touching the network.
//!
//! Idempotent up to `last_parsed_at`: two passes with the same target
//! version and an unchanged store produce the same `data_hash`, `cmra`, and
//! `rdi` values.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{ErrorSample, Mailbox};
use crate::util;
use crate::validator::ValidationClient;

use super::{parse_mailbox_html, MailboxStore, PipelineError, CURRENT_PARSER_VERSION};

const UPSERT_BATCH_SIZE: usize = 20;
const PROGRESS_INTERVAL: u64 = 25;

/// Options for a reprocess pass.
#[derive(Debug, Clone, Default)]
pub struct ReprocessOptions {
    /// Parser version to stamp on records; defaults to the current version.
    pub target_version: Option<String>,
    /// Skip records already at the target version.
    pub only_outdated: bool,
    /// Re-validate even when the fingerprint is unchanged (used when
    /// switching from the mock validator to the real one).
    pub force_revalidate: bool,
    /// Skip records last validated before this instant.
    pub since_time: Option<DateTime<Utc>>,
}

/// Counters for one reprocess execution.
#[derive(Debug, Default, Clone)]
pub struct ReprocessStats {
    pub total: u64,
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Skipped because no page body is stored.
    pub no_html: u64,
    /// Skipped because the record is already at the target version.
    pub up_to_date: u64,
    pub errors_sample: Vec<ErrorSample>,
}

impl ReprocessStats {
    fn record_error(&mut self, link: &str, reason: String) {
        if self.errors_sample.len() >= super::scrape::ERROR_SAMPLE_LIMIT {
            self.errors_sample.remove(0);
        }
        self.errors_sample.push(ErrorSample {
            link: link.to_string(),
            reason,
        });
    }
}

pub type ReprocessProgressFn<'a> = &'a (dyn Fn(&ReprocessStats) + Send + Sync);

/// Re-parse all stored mailboxes carrying page bodies.
#[allow(clippy::too_many_arguments)]
pub async fn reprocess_from_store(
    store: &dyn MailboxStore,
    validator: Option<&dyn ValidationClient>,
    opts: &ReprocessOptions,
    cancel: &CancellationToken,
    stats: &mut ReprocessStats,
    on_progress: Option<ReprocessProgressFn<'_>>,
) -> Result<(), PipelineError> {
    let target_version = opts
        .target_version
        .clone()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| CURRENT_PARSER_VERSION.to_string());

    let existing = tokio::select! {
        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        res = store.fetch_all_map() => res.map_err(PipelineError::Fatal)?,
    };

    stats.total = existing.len() as u64;
    info!(
        total = stats.total,
        target_version = %target_version,
        "reprocessing stored mailboxes"
    );

    let mut pending: Vec<Mailbox> = Vec::new();
    let mut needs_revalidation: Vec<usize> = Vec::new();

    // Deterministic order keeps two passes over the same store identical.
    let mut links: Vec<&String> = existing.keys().collect();
    links.sort();

    for link in links {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let old = &existing[link];

        if old.raw_html.is_empty() {
            stats.no_html += 1;
            stats.skipped += 1;
            if stats.no_html <= 3 {
                debug!(link = %link, "skipping record without stored page body");
            }
            continue;
        }

        if opts.only_outdated && old.parser_version == target_version {
            stats.up_to_date += 1;
            stats.skipped += 1;
            continue;
        }

        if let Some(since) = opts.since_time {
            if old.last_validated_at.map_or(true, |t| t < since) {
                stats.skipped += 1;
                continue;
            }
        }

        let mut reparsed = match parse_mailbox_html(old.raw_html.as_bytes(), link, old.source) {
            Ok(mailbox) => mailbox,
            Err(err) => {
                stats.failed += 1;
                stats.record_error(link, format!("parse: {err:#}"));
                warn!(link = %link, "reparse error: {err:#}");
                continue;
            }
        };

        // Carry over identity and crawl bookkeeping from the old record.
        reparsed.id = old.id.clone();
        reparsed.source = old.source;
        reparsed.link = link.clone();
        reparsed.raw_html = old.raw_html.clone();
        reparsed.crawl_run_id = old.crawl_run_id.clone();
        reparsed.active = old.active;
        reparsed.data_hash = util::fingerprint(&reparsed.name, &reparsed.address_raw);
        reparsed.parser_version = target_version.clone();
        reparsed.last_parsed_at = Some(Utc::now());

        let revalidate = reparsed.data_hash != old.data_hash || opts.force_revalidate;
        if !revalidate {
            // Data unchanged: keep the existing enrichment.
            reparsed.cmra = old.cmra.clone();
            reparsed.rdi = old.rdi.clone();
            reparsed.standardized_address = old.standardized_address.clone();
            reparsed.last_validated_at = old.last_validated_at;
        }

        if revalidate && validator.is_some() {
            needs_revalidation.push(pending.len());
        }
        pending.push(reparsed);
        stats.processed += 1;

        if pending.len() >= UPSERT_BATCH_SIZE {
            flush_pending(store, validator, &mut pending, &mut needs_revalidation, cancel, stats)
                .await?;
            fire_progress(on_progress, stats);
        }
    }

    flush_pending(store, validator, &mut pending, &mut needs_revalidation, cancel, stats).await?;

    info!(
        processed = stats.processed,
        skipped = stats.skipped,
        no_html = stats.no_html,
        up_to_date = stats.up_to_date,
        failed = stats.failed,
        "reprocessing complete"
    );
    if let Some(progress) = on_progress {
        progress(stats);
    }

    Ok(())
}

async fn flush_pending(
    store: &dyn MailboxStore,
    validator: Option<&dyn ValidationClient>,
    pending: &mut Vec<Mailbox>,
    needs_revalidation: &mut Vec<usize>,
    cancel: &CancellationToken,
    stats: &mut ReprocessStats,
) -> Result<(), PipelineError> {
    if pending.is_empty() {
        needs_revalidation.clear();
        return Ok(());
    }
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    if !needs_revalidation.is_empty() {
        if let Some(validator) = validator {
            let subset: Vec<Mailbox> = needs_revalidation
                .iter()
                .map(|&i| pending[i].clone())
                .collect();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                res = validator.validate_many(&subset) => res,
            };
            match outcome {
                Ok(validated) => {
                    for (j, &i) in needs_revalidation.iter().enumerate() {
                        pending[i] = validated[j].clone();
                    }
                }
                Err(err) => {
                    stats.failed += needs_revalidation.len() as u64;
                    stats.record_error("", format!("batch validation: {err}"));
                    warn!(
                        count = needs_revalidation.len(),
                        "batch revalidation failed, upserting reparsed fields: {err}"
                    );
                }
            }
        }
    }

    store
        .batch_upsert(pending)
        .await
        .map_err(PipelineError::Fatal)?;
    debug!(count = pending.len(), "flushed reprocessed batch");
    pending.clear();
    needs_revalidation.clear();
    Ok(())
}

fn fire_progress(on_progress: Option<ReprocessProgressFn<'_>>, stats: &ReprocessStats) {
    if let Some(progress) = on_progress {
        if stats.processed % PROGRESS_INTERVAL == 0
            || stats.processed + stats.skipped >= stats.total
        {
            progress(stats);
        }
    }
}
