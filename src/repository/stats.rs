//! System stats singleton repository.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use rusqlite::{params, Connection};

use crate::models::SystemStats;

use super::{parse_datetime_opt, to_option};

pub struct StatsRepository {
    db_path: PathBuf,
}

impl StatsRepository {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> anyhow::Result<Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS system_stats (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_updated TEXT,
                total_mailboxes INTEGER NOT NULL DEFAULT 0,
                total_commercial INTEGER NOT NULL DEFAULT 0,
                total_residential INTEGER NOT NULL DEFAULT 0,
                avg_price REAL NOT NULL DEFAULT 0,
                by_state TEXT NOT NULL DEFAULT '{}'
            );
        "#,
        )?;
        Ok(())
    }

    pub fn save_system_stats(&self, stats: &SystemStats) -> anyhow::Result<()> {
        let conn = self.connect()?;
        let last_updated = stats.last_updated.unwrap_or_else(Utc::now);
        conn.execute(
            r#"
            INSERT INTO system_stats (
                id, last_updated, total_mailboxes, total_commercial,
                total_residential, avg_price, by_state
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                last_updated = excluded.last_updated,
                total_mailboxes = excluded.total_mailboxes,
                total_commercial = excluded.total_commercial,
                total_residential = excluded.total_residential,
                avg_price = excluded.avg_price,
                by_state = excluded.by_state
            "#,
            params![
                last_updated.to_rfc3339(),
                stats.total_mailboxes as i64,
                stats.total_commercial as i64,
                stats.total_residential as i64,
                stats.avg_price,
                serde_json::to_string(&stats.by_state)?,
            ],
        )
        .context("save system stats")?;
        Ok(())
    }

    pub fn get_system_stats(&self) -> anyhow::Result<SystemStats> {
        let conn = self.connect()?;
        let row = to_option(conn.query_row(
            "SELECT * FROM system_stats WHERE id = 1",
            [],
            |row| {
                let by_state: String = row.get("by_state")?;
                Ok(SystemStats {
                    last_updated: parse_datetime_opt(row.get("last_updated")?),
                    total_mailboxes: row.get::<_, i64>("total_mailboxes")? as u64,
                    total_commercial: row.get::<_, i64>("total_commercial")? as u64,
                    total_residential: row.get::<_, i64>("total_residential")? as u64,
                    avg_price: row.get("avg_price")?,
                    by_state: serde_json::from_str(&by_state).unwrap_or_default(),
                })
            },
        ))?;
        row.context("system stats not computed yet")
    }
}
