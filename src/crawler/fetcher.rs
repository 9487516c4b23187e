//! Page fetching over HTTP.
//!
//! The fetcher is pluggable per provider: the ATMB crawl uses this plain
//! HTTP implementation, the iPost1 crawl goes through a browser adapter.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Abstracts how detail pages are fetched so pipelines are testable
/// without a network.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

/// HTTP fetcher with a browser user agent, timeout, and bounded retry on
/// transient failures (transport errors, 5xx, 408).
pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .gzip(true)
            .build()
            .expect("failed to create fetcher HTTP client");
        Self {
            client,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let attempts = self.max_retries + 1;
        for attempt in 0..attempts {
            let last = attempt + 1 == attempts;

            let response = match self.client.get(url).send().await {
                Ok(r) => r,
                Err(err) => {
                    if last {
                        return Err(err).with_context(|| format!("fetch url {url}"));
                    }
                    debug!(url, attempt, "fetch transport error, retrying: {err}");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    continue;
                }
            };

            let status = response.status().as_u16();
            if response.status().is_success() {
                let bytes = response
                    .bytes()
                    .await
                    .with_context(|| format!("read body for {url}"))?;
                return Ok(bytes.to_vec());
            }

            if is_retryable_status(status) && !last {
                debug!(url, status, attempt, "retryable fetch status");
                tokio::time::sleep(RETRY_BACKOFF).await;
                continue;
            }

            bail!("unexpected status {status} for {url}");
        }

        bail!("fetch failed after {} retries for {url}", self.max_retries)
    }
}
