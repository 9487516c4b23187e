//! Mark-and-sweep of records that disappeared from a provider.
//!
//! After a successful crawl, every record of the run's source whose
//! `crawl_run_id` differs from the current run is deactivated. The sweep is
//! scoped to one source: an ATMB crawl never touches iPost1 records.

use tracing::info;

use crate::models::Source;

use super::MailboxStore;

/// Deactivate mailboxes of `source` that the given run did not touch.
pub async fn mark_and_sweep(
    store: &dyn MailboxStore,
    current_run_id: &str,
    source: Source,
) -> anyhow::Result<()> {
    let all = store.fetch_source_map(source).await?;

    let mut to_update = Vec::new();
    for (_, mut mailbox) in all {
        if mailbox.crawl_run_id != current_run_id && mailbox.active {
            mailbox.active = false;
            to_update.push(mailbox);
        }
    }

    if to_update.is_empty() {
        return Ok(());
    }
    info!(
        source = %source,
        count = to_update.len(),
        run_id = current_run_id,
        "deactivating records missing from this run"
    );
    store.batch_upsert(&to_update).await
}
