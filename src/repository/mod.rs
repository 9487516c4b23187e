//! Persistence layer over the embedded document store.
//!
//! Collections: `mailboxes`, `crawl_runs`, and the `system_stats` singleton.
//! Repositories hold only the database path and open a short-lived
//! connection per call, which keeps them `Send + Sync` and safe to share
//! across the server and background run workers.

mod mailbox;
mod run;
mod stats;

pub use mailbox::{MailboxQuery, MailboxRepository};
pub use run::{RunRepository, STALE_RUN_TIMEOUT_MINUTES};
pub use stats::StatsRepository;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub(crate) fn connect(db_path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

pub(crate) fn to_option<T>(result: rusqlite::Result<T>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Parse an optional RFC 3339 timestamp column.
pub(crate) fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
