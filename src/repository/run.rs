//! Crawl run repository.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use tracing::warn;

use crate::models::{CrawlRun, CrawlRunStats, RunStatus, Source};

use super::parse_datetime_opt;

/// A `running` record older than this is considered stale and promoted to
/// `timeout` on the next list request. Strictly larger than the run budget
/// so a live run is never falsely timed out.
pub const STALE_RUN_TIMEOUT_MINUTES: i64 = 45;

fn stale_run_timeout() -> chrono::Duration {
    chrono::Duration::minutes(STALE_RUN_TIMEOUT_MINUTES)
}

#[derive(Clone)]
pub struct RunRepository {
    db_path: PathBuf,
}

impl RunRepository {
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
            CREATE TABLE IF NOT EXISTS crawl_runs (
                run_id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                status TEXT NOT NULL,
                found INTEGER NOT NULL DEFAULT 0,
                validated INTEGER NOT NULL DEFAULT 0,
                skipped INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                started_at TEXT,
                finished_at TEXT,
                errors_sample TEXT NOT NULL DEFAULT '[]'
            );
        "#,
        )?;
        Ok(())
    }

    fn row_to_run(row: &Row<'_>) -> rusqlite::Result<CrawlRun> {
        let source: String = row.get("source")?;
        let status: String = row.get("status")?;
        let errors_json: String = row.get("errors_sample")?;
        Ok(CrawlRun {
            run_id: row.get("run_id")?,
            source: Source::parse(&source).unwrap_or(Source::Atmb),
            status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
            stats: CrawlRunStats {
                found: row.get::<_, i64>("found")? as u64,
                validated: row.get::<_, i64>("validated")? as u64,
                skipped: row.get::<_, i64>("skipped")? as u64,
                failed: row.get::<_, i64>("failed")? as u64,
            },
            started_at: parse_datetime_opt(row.get("started_at")?),
            finished_at: parse_datetime_opt(row.get("finished_at")?),
            errors_sample: serde_json::from_str(&errors_json).unwrap_or_default(),
        })
    }

    fn upsert(&self, run: &CrawlRun) -> anyhow::Result<()> {
        if run.run_id.is_empty() {
            bail!("runId is required");
        }
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO crawl_runs (
                run_id, source, status, found, validated, skipped, failed,
                started_at, finished_at, errors_sample
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(run_id) DO UPDATE SET
                source = excluded.source,
                status = excluded.status,
                found = excluded.found,
                validated = excluded.validated,
                skipped = excluded.skipped,
                failed = excluded.failed,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                errors_sample = excluded.errors_sample
            "#,
            params![
                run.run_id,
                run.source.as_str(),
                run.status.as_str(),
                run.stats.found as i64,
                run.stats.validated as i64,
                run.stats.skipped as i64,
                run.stats.failed as i64,
                run.started_at.map(|t| t.to_rfc3339()),
                run.finished_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(&run.errors_sample)?,
            ],
        )
        .with_context(|| format!("write run {}", run.run_id))?;
        Ok(())
    }

    pub fn create_run(&self, run: &CrawlRun) -> anyhow::Result<()> {
        self.upsert(run)
    }

    pub fn update_run(&self, run: &CrawlRun) -> anyhow::Result<()> {
        self.upsert(run)
    }

    pub fn get_run(&self, run_id: &str) -> anyhow::Result<CrawlRun> {
        if run_id.is_empty() {
            bail!("runId is required");
        }
        let conn = self.connect()?;
        let run = conn
            .query_row(
                "SELECT * FROM crawl_runs WHERE run_id = ?1",
                params![run_id],
                Self::row_to_run,
            )
            .with_context(|| format!("get run {run_id}"))?;
        Ok(run)
    }

    /// Recent runs, newest first. Stale `running` records are promoted to
    /// `timeout` in the response, with the write scheduled asynchronously so
    /// the list request is not blocked on it.
    pub fn list_runs(&self, limit: u32) -> anyhow::Result<Vec<CrawlRun>> {
        let limit = if limit == 0 { 20 } else { limit };
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT * FROM crawl_runs ORDER BY run_id DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_run)?;

        let now = Utc::now();
        let mut runs = Vec::new();
        for row in rows {
            let mut run = row.context("decode run")?;

            let is_stale = run.status == RunStatus::Running
                && run
                    .started_at
                    .is_some_and(|started| now - started > stale_run_timeout());
            if is_stale {
                run.status = RunStatus::Timeout;
                run.finished_at = Some(now);

                let repo = self.clone();
                let stale = run.clone();
                tokio::spawn(async move {
                    if let Err(err) = repo.update_run(&stale) {
                        warn!(run_id = %stale.run_id, "stale run promotion failed: {err:#}");
                    }
                });
            }

            runs.push(run);
        }
        Ok(runs)
    }

    /// Repository-level cancel for runs whose worker is gone. Only a
    /// `running` record can be cancelled.
    pub fn cancel_run(&self, run_id: &str) -> anyhow::Result<()> {
        let mut run = self.get_run(run_id)?;
        if run.status != RunStatus::Running {
            bail!(
                "run {run_id} is not running (status: {})",
                run.status.as_str()
            );
        }
        run.status = RunStatus::Cancelled;
        run.finished_at = Some(Utc::now());
        self.update_run(&run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn repo() -> (RunRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = RunRepository::new(&dir.path().join("test.db")).unwrap();
        (repo, dir)
    }

    fn run(run_id: &str, status: RunStatus) -> CrawlRun {
        CrawlRun {
            run_id: run_id.to_string(),
            source: Source::Atmb,
            status,
            stats: CrawlRunStats::default(),
            started_at: Some(Utc::now()),
            finished_at: None,
            errors_sample: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_get_update() {
        let (repo, _dir) = repo();
        repo.create_run(&run("RUN_1", RunStatus::Running)).unwrap();

        let got = repo.get_run("RUN_1").unwrap();
        assert_eq!(got.status, RunStatus::Running);
        assert!(got.started_at.is_some());
        assert!(got.finished_at.is_none());

        let mut finished = got.clone();
        finished.status = RunStatus::Success;
        finished.finished_at = Some(Utc::now());
        finished.stats.found = 7;
        repo.update_run(&finished).unwrap();

        let got = repo.get_run("RUN_1").unwrap();
        assert_eq!(got.status, RunStatus::Success);
        assert_eq!(got.stats.found, 7);
        assert!(got.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_get_missing_run_errors() {
        let (repo, _dir) = repo();
        assert!(repo.get_run("RUN_MISSING").is_err());
        assert!(repo.get_run("").is_err());
    }

    #[tokio::test]
    async fn test_list_promotes_stale_running_runs() {
        let (repo, _dir) = repo();
        let mut stale = run("RUN_1", RunStatus::Running);
        stale.started_at = Some(Utc::now() - chrono::Duration::hours(1));
        repo.create_run(&stale).unwrap();

        let mut fresh = run("RUN_2", RunStatus::Running);
        fresh.started_at = Some(Utc::now());
        repo.create_run(&fresh).unwrap();

        let runs = repo.list_runs(20).unwrap();
        assert_eq!(runs.len(), 2);
        // Newest first by run id.
        assert_eq!(runs[0].run_id, "RUN_2");
        assert_eq!(runs[0].status, RunStatus::Running);
        assert_eq!(runs[1].run_id, "RUN_1");
        assert_eq!(runs[1].status, RunStatus::Timeout);
        assert!(runs[1].finished_at.is_some());
    }

    #[tokio::test]
    async fn test_list_limit() {
        let (repo, _dir) = repo();
        for i in 0..30 {
            repo.create_run(&run(&format!("RUN_{i:03}"), RunStatus::Success))
                .unwrap();
        }
        let runs = repo.list_runs(20).unwrap();
        assert_eq!(runs.len(), 20);
        assert_eq!(runs[0].run_id, "RUN_029");
    }

    #[tokio::test]
    async fn test_cancel_only_running_runs() {
        let (repo, _dir) = repo();
        repo.create_run(&run("RUN_1", RunStatus::Running)).unwrap();
        repo.cancel_run("RUN_1").unwrap();
        let got = repo.get_run("RUN_1").unwrap();
        assert_eq!(got.status, RunStatus::Cancelled);
        assert!(got.finished_at.is_some());

        // Terminal runs cannot be cancelled again.
        assert!(repo.cancel_run("RUN_1").is_err());
    }

    #[tokio::test]
    async fn test_errors_sample_round_trips() {
        let (repo, _dir) = repo();
        let mut failed = run("RUN_1", RunStatus::Failed);
        failed.errors_sample = vec![crate::models::ErrorSample {
            link: "https://a.example".to_string(),
            reason: "parse: no name".to_string(),
        }];
        repo.create_run(&failed).unwrap();

        let got = repo.get_run("RUN_1").unwrap();
        assert_eq!(got.errors_sample.len(), 1);
        assert_eq!(got.errors_sample[0].reason, "parse: no name");
    }
}
