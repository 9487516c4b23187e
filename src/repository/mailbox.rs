//! Mailbox repository.
//!
//! Documents are keyed by `id`, which defaults to the 128-bit hash of the
//! canonical link, so re-upserting the same listing always targets the same
//! document.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{params, Connection, Row};

use crate::crawler::MailboxStore;
use crate::models::{AddressRaw, Mailbox, Source, StandardizedAddress};
use crate::util;

use super::parse_datetime_opt;

/// Commit upserts in chunks to bound transaction size (`raw_html` is large).
const UPSERT_CHUNK: usize = 400;

/// Filters for the dashboard listing endpoint.
#[derive(Debug, Clone, Default)]
pub struct MailboxQuery {
    pub state: Option<String>,
    pub cmra: Option<String>,
    pub rdi: Option<String>,
    pub source: Option<Source>,
    pub active: Option<bool>,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
}

pub struct MailboxRepository {
    db_path: PathBuf,
}

impl MailboxRepository {
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
            CREATE TABLE IF NOT EXISTS mailboxes (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                street TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT '',
                zip TEXT NOT NULL DEFAULT '',
                price REAL NOT NULL DEFAULT 0,
                link TEXT NOT NULL DEFAULT '',
                cmra TEXT NOT NULL DEFAULT '',
                rdi TEXT NOT NULL DEFAULT '',
                delivery_line_1 TEXT NOT NULL DEFAULT '',
                last_line TEXT NOT NULL DEFAULT '',
                data_hash TEXT NOT NULL DEFAULT '',
                raw_html TEXT NOT NULL DEFAULT '',
                parser_version TEXT NOT NULL DEFAULT '',
                active INTEGER NOT NULL DEFAULT 0,
                crawl_run_id TEXT NOT NULL DEFAULT '',
                last_validated_at TEXT,
                last_parsed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_mailboxes_source ON mailboxes(source);
            CREATE INDEX IF NOT EXISTS idx_mailboxes_link ON mailboxes(link);
        "#,
        )?;
        Ok(())
    }

    fn row_to_mailbox(row: &Row<'_>) -> rusqlite::Result<Mailbox> {
        let source: String = row.get("source")?;
        Ok(Mailbox {
            id: row.get("id")?,
            source: Source::parse(&source).unwrap_or(Source::Atmb),
            name: row.get("name")?,
            address_raw: AddressRaw {
                street: row.get("street")?,
                city: row.get("city")?,
                state: row.get("state")?,
                zip: row.get("zip")?,
            },
            price: row.get("price")?,
            link: row.get("link")?,
            cmra: row.get("cmra")?,
            rdi: row.get("rdi")?,
            standardized_address: StandardizedAddress {
                delivery_line1: row.get("delivery_line_1")?,
                last_line: row.get("last_line")?,
            },
            data_hash: row.get("data_hash")?,
            last_validated_at: parse_datetime_opt(row.get("last_validated_at")?),
            crawl_run_id: row.get("crawl_run_id")?,
            active: row.get::<_, i64>("active")? != 0,
            raw_html: row.get("raw_html")?,
            parser_version: row.get("parser_version")?,
            last_parsed_at: parse_datetime_opt(row.get("last_parsed_at")?),
        })
    }

    fn fetch_map_sync(&self, source: Option<Source>) -> anyhow::Result<HashMap<String, Mailbox>> {
        let conn = self.connect()?;
        let (sql, args): (&str, Vec<String>) = match source {
            Some(s) => (
                "SELECT * FROM mailboxes WHERE source = ?1",
                vec![s.as_str().to_string()],
            ),
            None => ("SELECT * FROM mailboxes", Vec::new()),
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), Self::row_to_mailbox)?;

        let mut result = HashMap::new();
        for row in rows {
            let mailbox = row.context("decode mailbox")?;
            let key = if mailbox.link.is_empty() {
                mailbox.id.clone()
            } else {
                mailbox.link.clone()
            };
            result.insert(key, mailbox);
        }
        Ok(result)
    }

    fn fetch_metadata_sync(&self) -> anyhow::Result<HashMap<String, Mailbox>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT id, source, link, data_hash, cmra, rdi FROM mailboxes")?;
        let rows = stmt.query_map([], |row| {
            let source: String = row.get("source")?;
            let mut mailbox = Mailbox::new(Source::parse(&source).unwrap_or(Source::Atmb));
            mailbox.id = row.get("id")?;
            mailbox.link = row.get("link")?;
            mailbox.data_hash = row.get("data_hash")?;
            mailbox.cmra = row.get("cmra")?;
            mailbox.rdi = row.get("rdi")?;
            Ok(mailbox)
        })?;

        let mut result = HashMap::new();
        for row in rows {
            let mailbox = row.context("decode mailbox metadata")?;
            let key = if mailbox.link.is_empty() {
                mailbox.id.clone()
            } else {
                mailbox.link.clone()
            };
            result.insert(key, mailbox);
        }
        Ok(result)
    }

    fn batch_upsert_sync(&self, mailboxes: &[Mailbox]) -> anyhow::Result<()> {
        if mailboxes.is_empty() {
            return Ok(());
        }
        let mut conn = self.connect()?;

        for chunk in mailboxes.chunks(UPSERT_CHUNK) {
            let tx = conn.transaction()?;
            for mailbox in chunk {
                let id = document_id(mailbox);
                tx.execute(
                    r#"
                    INSERT INTO mailboxes (
                        id, source, name, street, city, state, zip, price, link,
                        cmra, rdi, delivery_line_1, last_line, data_hash, raw_html,
                        parser_version, active, crawl_run_id, last_validated_at, last_parsed_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
                    ON CONFLICT(id) DO UPDATE SET
                        source = excluded.source,
                        name = excluded.name,
                        street = excluded.street,
                        city = excluded.city,
                        state = excluded.state,
                        zip = excluded.zip,
                        price = excluded.price,
                        link = excluded.link,
                        cmra = excluded.cmra,
                        rdi = excluded.rdi,
                        delivery_line_1 = excluded.delivery_line_1,
                        last_line = excluded.last_line,
                        data_hash = excluded.data_hash,
                        raw_html = excluded.raw_html,
                        parser_version = excluded.parser_version,
                        active = excluded.active,
                        crawl_run_id = excluded.crawl_run_id,
                        last_validated_at = excluded.last_validated_at,
                        last_parsed_at = excluded.last_parsed_at
                    "#,
                    params![
                        id,
                        mailbox.source.as_str(),
                        mailbox.name,
                        mailbox.address_raw.street,
                        mailbox.address_raw.city,
                        mailbox.address_raw.state,
                        mailbox.address_raw.zip,
                        mailbox.price,
                        mailbox.link,
                        mailbox.cmra,
                        mailbox.rdi,
                        mailbox.standardized_address.delivery_line1,
                        mailbox.standardized_address.last_line,
                        mailbox.data_hash,
                        mailbox.raw_html,
                        mailbox.parser_version,
                        mailbox.active as i64,
                        mailbox.crawl_run_id,
                        mailbox.last_validated_at.map(|t| t.to_rfc3339()),
                        mailbox.last_parsed_at.map(|t| t.to_rfc3339()),
                    ],
                )?;
            }
            tx.commit().context("commit mailbox batch")?;
        }
        Ok(())
    }

    /// Filtered, paginated listing for the API.
    pub fn list(&self, query: &MailboxQuery) -> anyhow::Result<(Vec<Mailbox>, u64)> {
        let conn = self.connect()?;

        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(state) = &query.state {
            clauses.push("state = ?");
            args.push(Box::new(state.clone()));
        }
        if let Some(cmra) = &query.cmra {
            clauses.push("cmra = ?");
            args.push(Box::new(cmra.clone()));
        }
        if let Some(rdi) = &query.rdi {
            clauses.push("rdi = ?");
            args.push(Box::new(rdi.clone()));
        }
        if let Some(source) = query.source {
            clauses.push("source = ?");
            args.push(Box::new(source.as_str().to_string()));
        }
        if let Some(active) = query.active {
            clauses.push("active = ?");
            args.push(Box::new(active as i64));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM mailboxes{where_sql}"),
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row.get(0),
        )?;

        let page = query.page.max(1);
        let page_size = if query.page_size == 0 {
            50
        } else {
            query.page_size.min(500)
        };
        let offset = (page - 1) as i64 * page_size as i64;
        args.push(Box::new(page_size as i64));
        args.push(Box::new(offset));

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM mailboxes{where_sql} ORDER BY link LIMIT ? OFFSET ?"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            Self::row_to_mailbox,
        )?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row.context("decode mailbox")?);
        }
        Ok((items, total))
    }

    /// Stream every mailbox through a callback, cheapest-first ordering by
    /// link. Used by the CSV export to avoid materializing the whole set.
    pub fn stream_all(
        &self,
        active_only: bool,
        mut f: impl FnMut(Mailbox) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let conn = self.connect()?;
        let sql = if active_only {
            "SELECT * FROM mailboxes WHERE active = 1 ORDER BY link"
        } else {
            "SELECT * FROM mailboxes ORDER BY link"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], Self::row_to_mailbox)?;
        for row in rows {
            f(row.context("decode mailbox")?)?;
        }
        Ok(())
    }
}

/// Stable document id: explicit id, else hash of the canonical link, else
/// hash of the parsed fields.
fn document_id(mailbox: &Mailbox) -> String {
    if !mailbox.id.is_empty() {
        return mailbox.id.clone();
    }
    if !mailbox.link.is_empty() {
        return util::hash_string(&mailbox.link);
    }
    util::fingerprint(&mailbox.name, &mailbox.address_raw)
}

#[async_trait]
impl MailboxStore for MailboxRepository {
    async fn fetch_all_map(&self) -> anyhow::Result<HashMap<String, Mailbox>> {
        self.fetch_map_sync(None)
    }

    async fn fetch_all_metadata(&self) -> anyhow::Result<HashMap<String, Mailbox>> {
        self.fetch_metadata_sync()
    }

    async fn fetch_source_map(&self, source: Source) -> anyhow::Result<HashMap<String, Mailbox>> {
        self.fetch_map_sync(Some(source))
    }

    async fn batch_upsert(&self, mailboxes: &[Mailbox]) -> anyhow::Result<()> {
        self.batch_upsert_sync(mailboxes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn mailbox(link: &str, source: Source) -> Mailbox {
        let mut m = Mailbox::new(source);
        m.name = format!("Store {link}");
        m.link = link.to_string();
        m.address_raw = AddressRaw {
            street: "1 Main St".to_string(),
            city: "Dover".to_string(),
            state: "DE".to_string(),
            zip: "19901".to_string(),
        };
        m.price = 9.99;
        m.raw_html = "<html>page</html>".to_string();
        m.active = true;
        m.crawl_run_id = "RUN_1".to_string();
        m.data_hash = util::fingerprint(&m.name, &m.address_raw);
        m.last_parsed_at = Some(Utc::now());
        m
    }

    fn repo() -> (MailboxRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = MailboxRepository::new(&dir.path().join("test.db")).unwrap();
        (repo, dir)
    }

    #[tokio::test]
    async fn test_upsert_assigns_id_from_link_and_is_stable() {
        let (repo, _dir) = repo();
        let mb = mailbox("https://a.example/locations/x", Source::Atmb);
        repo.batch_upsert(&[mb.clone()]).await.unwrap();
        repo.batch_upsert(&[mb.clone()]).await.unwrap();

        let all = repo.fetch_all_map().await.unwrap();
        assert_eq!(all.len(), 1);
        let stored = &all[&mb.link];
        assert_eq!(stored.id, util::hash_string(&mb.link));
        assert_eq!(stored.name, mb.name);
        assert_eq!(stored.raw_html, mb.raw_html);
        assert!(stored.active);
    }

    #[tokio::test]
    async fn test_metadata_projection_omits_page_body() {
        let (repo, _dir) = repo();
        repo.batch_upsert(&[mailbox("https://a.example/locations/x", Source::Atmb)])
            .await
            .unwrap();

        let meta = repo.fetch_all_metadata().await.unwrap();
        let m = &meta["https://a.example/locations/x"];
        assert!(m.raw_html.is_empty());
        assert!(!m.id.is_empty());
        assert!(!m.data_hash.is_empty());
        assert_eq!(m.source, Source::Atmb);
    }

    #[tokio::test]
    async fn test_fetch_source_map_filters() {
        let (repo, _dir) = repo();
        repo.batch_upsert(&[
            mailbox("https://a.example/locations/atmb", Source::Atmb),
            mailbox("https://ipostal1.com/secure_checkout?store=1", Source::Ipost1),
        ])
        .await
        .unwrap();

        let atmb = repo.fetch_source_map(Source::Atmb).await.unwrap();
        assert_eq!(atmb.len(), 1);
        assert!(atmb.contains_key("https://a.example/locations/atmb"));

        let ipost1 = repo.fetch_source_map(Source::Ipost1).await.unwrap();
        assert_eq!(ipost1.len(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_and_pagination() {
        let (repo, _dir) = repo();
        let mut records = Vec::new();
        for i in 0..5 {
            let mut m = mailbox(&format!("https://a.example/locations/{i}"), Source::Atmb);
            m.cmra = if i % 2 == 0 { "Y" } else { "N" }.to_string();
            m.rdi = "Commercial".to_string();
            records.push(m);
        }
        let mut inactive = mailbox("https://a.example/locations/old", Source::Atmb);
        inactive.active = false;
        records.push(inactive);
        repo.batch_upsert(&records).await.unwrap();

        let (items, total) = repo
            .list(&MailboxQuery {
                cmra: Some("Y".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(items.len(), 3);

        let (items, total) = repo
            .list(&MailboxQuery {
                active: Some(true),
                page: 2,
                page_size: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(items.len(), 2);

        let (items, total) = repo
            .list(&MailboxQuery {
                state: Some("WA".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 0);
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_stream_all_active_only() {
        let (repo, _dir) = repo();
        let mut inactive = mailbox("https://a.example/locations/old", Source::Atmb);
        inactive.active = false;
        repo.batch_upsert(&[
            mailbox("https://a.example/locations/live", Source::Atmb),
            inactive,
        ])
        .await
        .unwrap();

        let mut seen = Vec::new();
        repo.stream_all(true, |m| {
            seen.push(m.link);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec!["https://a.example/locations/live"]);
    }

    #[tokio::test]
    async fn test_preserved_id_wins_over_link_hash() {
        let (repo, _dir) = repo();
        let mut mb = mailbox("https://a.example/locations/x", Source::Atmb);
        mb.id = "custom-id".to_string();
        repo.batch_upsert(std::slice::from_ref(&mb)).await.unwrap();

        let all = repo.fetch_all_map().await.unwrap();
        assert_eq!(all[&mb.link].id, "custom-id");
    }
}
