//! iPost1 discovery and enrichment pipeline.
//!
//! There are no per-listing detail pages: each state's locations endpoint
//! returns every card at once, so discovery yields parsed records directly
//! and the pipeline picks up at the dedupe/validate/upsert stages.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{Mailbox, Source};
use crate::util;
use crate::validator::ValidationClient;

use super::super::scrape::{flush_pending, ProgressFn, ScrapeStats};
use super::super::{MailboxStore, PipelineError, CURRENT_PARSER_VERSION};
use super::{parse_locations_html, Ipost1Client};

/// Pause between state requests so the provider is not hammered.
const STATE_DELAY: Duration = Duration::from_secs(2);

const UPSERT_BATCH_SIZE: usize = 20;

/// Fetch every state's locations and parse them into mailbox records.
/// Per-state failures are logged and skipped; only the states list itself
/// is fatal.
pub async fn discover_all(
    client: &dyn Ipost1Client,
    cancel: &CancellationToken,
) -> Result<Vec<Mailbox>, PipelineError> {
    info!("fetching US states list");
    let states = tokio::select! {
        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        res = client.states() => res.map_err(PipelineError::Fatal)?,
    };
    info!(count = states.len(), "found states/territories");

    let mut all = Vec::new();
    for (i, state) in states.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        info!(
            state = %state.name,
            state_id = %state.id,
            "processing state {}/{}",
            i + 1,
            states.len()
        );

        let display = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            res = client.locations_display(&state.id) => res,
        };
        let display = match display {
            Ok(html) => html,
            Err(err) => {
                warn!(state = %state.name, "error fetching locations: {err:#}");
                continue;
            }
        };

        let mailboxes = parse_locations_html(&display);
        info!(state = %state.name, count = mailboxes.len(), "parsed locations");
        all.extend(mailboxes);

        if i + 1 < states.len() {
            tokio::time::sleep(STATE_DELAY).await;
        }
    }

    info!(total = all.len(), "discovery complete");
    Ok(all)
}

/// Discover all iPost1 locations, then dedupe, batch-validate, and upsert
/// them. The counterpart of the ATMB scrape pipeline for records that
/// arrive pre-parsed.
pub async fn process_and_validate(
    client: &dyn Ipost1Client,
    store: &dyn MailboxStore,
    validator: Option<&dyn ValidationClient>,
    run_id: &str,
    cancel: &CancellationToken,
    stats: &mut ScrapeStats,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<(), PipelineError> {
    let discovered = discover_all(client, cancel).await?;
    stats.found = discovered.len() as u64;
    if discovered.is_empty() {
        return Err(PipelineError::Fatal(anyhow::anyhow!(
            "no locations discovered"
        )));
    }

    let existing = tokio::select! {
        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        res = store.fetch_all_metadata() => res.map_err(PipelineError::Fatal)?,
    };

    let mut pending: Vec<Mailbox> = Vec::new();
    let mut needs_validation: Vec<usize> = Vec::new();

    for mut mailbox in discovered {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        if util::needs_cleanup(&mailbox.address_raw) {
            debug!(link = %mailbox.link, "address still carries scraper residue");
        }

        mailbox.source = Source::Ipost1;
        mailbox.crawl_run_id = run_id.to_string();
        mailbox.active = true;
        mailbox.parser_version = CURRENT_PARSER_VERSION.to_string();
        mailbox.last_parsed_at = Some(Utc::now());
        mailbox.data_hash = util::fingerprint(&mailbox.name, &mailbox.address_raw);

        if let Some(prev) = existing.get(&mailbox.link) {
            if prev.data_hash == mailbox.data_hash && !prev.cmra.is_empty() {
                stats.skipped += 1;
                continue;
            }
            mailbox.id = prev.id.clone();
        }

        if mailbox.needs_validation() {
            needs_validation.push(pending.len());
        }
        pending.push(mailbox);
        stats.updated += 1;

        if pending.len() >= UPSERT_BATCH_SIZE {
            flush_pending(store, validator, &mut pending, &mut needs_validation, cancel, stats)
                .await?;
            if let Some(progress) = on_progress {
                progress(stats);
            }
        }
    }

    flush_pending(store, validator, &mut pending, &mut needs_validation, cancel, stats).await?;
    if let Some(progress) = on_progress {
        progress(stats);
    }

    Ok(())
}
