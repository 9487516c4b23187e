//! Runtime configuration from environment variables.

use std::path::PathBuf;

use anyhow::{bail, Context};

/// Settings loaded from the environment, with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP API listens on.
    pub port: u16,
    /// Path of the embedded document store.
    pub database_path: PathBuf,
    /// Validator credentials as parallel lists (comma-separated in the
    /// environment); cardinalities must match.
    pub smarty_auth_ids: Vec<String>,
    pub smarty_auth_tokens: Vec<String>,
    /// Short-circuit validation with canned results (dry runs, development).
    pub smarty_mock: bool,
    /// CORS origin allow-list, comma-separated; `*` permits any origin.
    pub allowed_origins: String,
    /// Seed listing URLs for ATMB link discovery.
    pub crawl_link_seeds: Vec<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let port: u16 = env_or("PORT", "8080")
            .parse()
            .context("parse PORT")?;

        let smarty_mock = match env_trimmed("SMARTY_MOCK") {
            None => false,
            Some(raw) => raw
                .parse::<bool>()
                .with_context(|| format!("parse SMARTY_MOCK {raw:?}"))?,
        };

        let cfg = Self {
            port,
            database_path: PathBuf::from(env_or("DATABASE_PATH", "mailverify.db")),
            smarty_auth_ids: env_csv("SMARTY_AUTH_ID"),
            smarty_auth_tokens: env_csv("SMARTY_AUTH_TOKEN"),
            smarty_mock,
            allowed_origins: env_trimmed("ALLOWED_ORIGINS").unwrap_or_default(),
            crawl_link_seeds: env_csv("CRAWL_LINK_SEEDS"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.smarty_auth_ids.len() != self.smarty_auth_tokens.len() {
            bail!(
                "SMARTY_AUTH_ID and SMARTY_AUTH_TOKEN must have the same number of entries ({} vs {})",
                self.smarty_auth_ids.len(),
                self.smarty_auth_tokens.len()
            );
        }
        if !self.smarty_mock && self.smarty_auth_ids.is_empty() {
            bail!("no validator credentials configured (set SMARTY_AUTH_ID/SMARTY_AUTH_TOKEN or SMARTY_MOCK=true)");
        }
        Ok(())
    }
}

fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_trimmed(key).unwrap_or_else(|| default.to_string())
}

fn env_csv(key: &str) -> Vec<String> {
    env_trimmed(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
