//! CASS/DPV address-validation client.
//!
//! Wraps the external validator with multi-credential round-robin, bounded
//! retry with backoff, and a per-credential circuit breaker that opens after
//! repeated rate-limit (402/429) responses. Supports single-address GET and
//! batched POST (up to 100 addresses per request), plus a mock mode for dry
//! runs and development.

mod pool;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Mailbox, StandardizedAddress};
use pool::CredentialPool;
pub use transport::{HttpTransport, ReqwestTransport, TransportResponse};

const DEFAULT_BASE_URL: &str = "https://us-street.api.smarty.com/street-address";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BREAKER_THRESHOLD: u32 = 5;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Validator API limit: 100 addresses per POST request.
const MAX_BATCH_SIZE: usize = 100;

const TRANSPORT_BACKOFF: Duration = Duration::from_millis(100);
const RATE_LIMIT_BACKOFF: Duration = Duration::from_millis(500);
const HTTP_ERROR_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ValidatorError {
    /// A credential's breaker opened after repeated 402/429 responses.
    #[error("validator circuit open after repeated rate-limit responses")]
    CircuitOpen,
    /// Every configured credential has an open breaker.
    #[error("all validator credentials exhausted")]
    AllCredentialsExhausted,
    #[error("no validator credentials configured")]
    NoCredentials,
    /// The response carried no candidates for the address (single mode only).
    #[error("validator returned no candidates")]
    NoCandidates,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Abstracts validation so pipelines can run against test doubles.
#[async_trait]
pub trait ValidationClient: Send + Sync {
    /// Enrich one mailbox with CMRA/RDI and a standardized address.
    async fn validate_one(&self, mailbox: &Mailbox) -> Result<Mailbox, ValidatorError>;

    /// Enrich a batch. The result always has the same length as the input;
    /// entries the validator did not recognize keep their original fields.
    async fn validate_many(&self, mailboxes: &[Mailbox]) -> Result<Vec<Mailbox>, ValidatorError>;
}

/// Settings for [`SmartyClient`].
#[derive(Debug, Clone, Default)]
pub struct SmartyConfig {
    /// Parallel credential lists; cardinalities must match.
    pub auth_ids: Vec<String>,
    pub auth_tokens: Vec<String>,
    pub base_url: Option<String>,
    /// Short-circuit every call with canned commercial results.
    pub mock: bool,
    pub max_retries: Option<u32>,
    pub breaker_threshold: Option<u32>,
}

/// Validator client with retry, rotation, and circuit-breaker support.
pub struct SmartyClient {
    transport: Arc<dyn HttpTransport>,
    pool: CredentialPool,
    base_url: String,
    mock: bool,
    max_retries: u32,
    breaker_threshold: u32,
}

impl SmartyClient {
    pub fn new(cfg: SmartyConfig) -> Self {
        Self::with_transport(Arc::new(ReqwestTransport::new(DEFAULT_TIMEOUT)), cfg)
    }

    pub fn with_transport(transport: Arc<dyn HttpTransport>, cfg: SmartyConfig) -> Self {
        Self {
            transport,
            pool: CredentialPool::new(&cfg.auth_ids, &cfg.auth_tokens),
            base_url: cfg
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            mock: cfg.mock,
            max_retries: cfg.max_retries.filter(|&r| r > 0).unwrap_or(DEFAULT_MAX_RETRIES),
            breaker_threshold: cfg
                .breaker_threshold
                .filter(|&b| b > 0)
                .unwrap_or(DEFAULT_BREAKER_THRESHOLD),
        }
    }

    /// Try each credential from the round-robin start, skipping open breakers.
    async fn dispatch<F, Fut, T>(&self, mut call: F) -> Result<T, ValidatorError>
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, ValidatorError>>,
    {
        if self.pool.is_empty() {
            return Err(ValidatorError::NoCredentials);
        }

        let start = self.pool.next_start_index();
        let mut tried = 0;

        while tried < self.pool.len() {
            let index = (start + tried) % self.pool.len();

            if self.pool.limit_count(index) >= self.breaker_threshold {
                debug!(
                    credential = %CredentialPool::mask(&self.pool.credential(index).auth_id),
                    "circuit breaker open, trying next credential"
                );
                tried += 1;
                continue;
            }

            match call(index).await {
                Ok(result) => {
                    self.pool.record_success(index);
                    return Ok(result);
                }
                Err(ValidatorError::CircuitOpen) => {
                    warn!(
                        credential = %CredentialPool::mask(&self.pool.credential(index).auth_id),
                        "credential hit circuit breaker, rotating"
                    );
                    tried += 1;
                }
                Err(err) => return Err(err),
            }
        }

        Err(ValidatorError::AllCredentialsExhausted)
    }

    /// One GET exchange with a specific credential, with bounded retry.
    async fn request_single(
        &self,
        index: usize,
        mailbox: &Mailbox,
    ) -> Result<Mailbox, ValidatorError> {
        let cred = self.pool.credential(index);
        let mut endpoint =
            url::Url::parse(&self.base_url).context("parse validator base url")?;
        endpoint
            .query_pairs_mut()
            .append_pair("auth-id", &cred.auth_id)
            .append_pair("auth-token", &cred.auth_token)
            .append_pair("street", &mailbox.address_raw.street)
            .append_pair("city", &mailbox.address_raw.city)
            .append_pair("state", &mailbox.address_raw.state)
            .append_pair("zipcode", &mailbox.address_raw.zip);
        let endpoint = endpoint.to_string();

        let attempts = self.max_retries + 1;
        for attempt in 0..attempts {
            let last = attempt + 1 == attempts;
            let response = match self.transport.get(&endpoint).await {
                Ok(r) => r,
                Err(err) => {
                    if last {
                        return Err(ValidatorError::Other(err.context("validator request")));
                    }
                    tokio::time::sleep(TRANSPORT_BACKOFF).await;
                    continue;
                }
            };

            match response.status {
                200 => return decode_single(mailbox, &response.body),
                402 | 429 => {
                    let count = self.pool.record_rate_limit(index);
                    warn!(
                        credential = %CredentialPool::mask(&cred.auth_id),
                        status = response.status,
                        count,
                        threshold = self.breaker_threshold,
                        "validator rate limited"
                    );
                    if count >= self.breaker_threshold {
                        return Err(ValidatorError::CircuitOpen);
                    }
                    tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                }
                status => {
                    if last {
                        return Err(ValidatorError::Other(anyhow::anyhow!(
                            "validator status {status}: {}",
                            String::from_utf8_lossy(&response.body)
                        )));
                    }
                    tokio::time::sleep(HTTP_ERROR_BACKOFF).await;
                }
            }
        }

        Err(ValidatorError::Other(anyhow::anyhow!(
            "validation failed after {} retries",
            self.max_retries
        )))
    }

    /// One POST exchange for a chunk of up to [`MAX_BATCH_SIZE`] addresses.
    async fn request_chunk(
        &self,
        index: usize,
        chunk: &[Mailbox],
        body: &[u8],
    ) -> Result<Vec<Mailbox>, ValidatorError> {
        let cred = self.pool.credential(index);
        let mut endpoint =
            url::Url::parse(&self.base_url).context("parse validator base url")?;
        endpoint
            .query_pairs_mut()
            .append_pair("auth-id", &cred.auth_id)
            .append_pair("auth-token", &cred.auth_token);
        let endpoint = endpoint.to_string();

        let attempts = self.max_retries + 1;
        for attempt in 0..attempts {
            let last = attempt + 1 == attempts;
            let response = match self.transport.post_json(&endpoint, body.to_vec()).await {
                Ok(r) => r,
                Err(err) => {
                    if last {
                        return Err(ValidatorError::Other(err.context("validator batch request")));
                    }
                    tokio::time::sleep(TRANSPORT_BACKOFF).await;
                    continue;
                }
            };

            match response.status {
                200 => return decode_batch(chunk, &response.body),
                402 | 429 => {
                    let count = self.pool.record_rate_limit(index);
                    warn!(
                        credential = %CredentialPool::mask(&cred.auth_id),
                        status = response.status,
                        count,
                        threshold = self.breaker_threshold,
                        "validator rate limited (batch)"
                    );
                    if count >= self.breaker_threshold {
                        return Err(ValidatorError::CircuitOpen);
                    }
                    tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                }
                status => {
                    if last {
                        return Err(ValidatorError::Other(anyhow::anyhow!(
                            "validator batch status {status}: {}",
                            String::from_utf8_lossy(&response.body)
                        )));
                    }
                    tokio::time::sleep(HTTP_ERROR_BACKOFF).await;
                }
            }
        }

        Err(ValidatorError::Other(anyhow::anyhow!(
            "batch validation failed after {} retries",
            self.max_retries
        )))
    }

    fn mock_one(mailbox: &Mailbox) -> Mailbox {
        let mut enriched = mailbox.clone();
        enriched.cmra = "Y".to_string();
        enriched.rdi = "Commercial".to_string();
        enriched.standardized_address = StandardizedAddress {
            delivery_line1: mailbox.address_raw.street.clone(),
            last_line: format!(
                "{}, {} {}",
                mailbox.address_raw.city, mailbox.address_raw.state, mailbox.address_raw.zip
            ),
        };
        enriched.last_validated_at = Some(Utc::now());
        enriched
    }
}

#[async_trait]
impl ValidationClient for SmartyClient {
    async fn validate_one(&self, mailbox: &Mailbox) -> Result<Mailbox, ValidatorError> {
        if self.mock {
            return Ok(Self::mock_one(mailbox));
        }

        self.dispatch(|index| self.request_single(index, mailbox))
            .await
    }

    async fn validate_many(&self, mailboxes: &[Mailbox]) -> Result<Vec<Mailbox>, ValidatorError> {
        if mailboxes.is_empty() {
            return Ok(Vec::new());
        }
        if self.mock {
            return Ok(mailboxes.iter().map(Self::mock_one).collect());
        }
        if self.pool.is_empty() {
            return Err(ValidatorError::NoCredentials);
        }

        let mut results: Vec<Mailbox> = mailboxes.to_vec();

        for start in (0..mailboxes.len()).step_by(MAX_BATCH_SIZE) {
            let end = (start + MAX_BATCH_SIZE).min(mailboxes.len());
            let chunk = &mailboxes[start..end];

            let body: Vec<BatchRequest> = chunk
                .iter()
                .map(|m| BatchRequest {
                    street: m.address_raw.street.clone(),
                    city: m.address_raw.city.clone(),
                    state: m.address_raw.state.clone(),
                    zipcode: m.address_raw.zip.clone(),
                })
                .collect();
            let body = serde_json::to_vec(&body).context("serialize batch request")?;

            let chunk_results = match self
                .dispatch(|index| self.request_chunk(index, chunk, &body))
                .await
            {
                Ok(results) => results,
                Err(err) => {
                    warn!(start, end, "batch validation chunk failed: {err}");
                    return Err(err);
                }
            };

            results[start..end].clone_from_slice(&chunk_results);
        }

        Ok(results)
    }
}

#[derive(Debug, Serialize)]
struct BatchRequest {
    street: String,
    city: String,
    state: String,
    zipcode: String,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateMetadata {
    #[serde(default)]
    rdi: String,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateAnalysis {
    #[serde(default)]
    dpv_cmra: String,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    delivery_line_1: String,
    #[serde(default)]
    last_line: String,
    #[serde(default)]
    metadata: CandidateMetadata,
    #[serde(default)]
    analysis: CandidateAnalysis,
}

#[derive(Debug, Deserialize)]
struct BatchCandidate {
    #[serde(default)]
    input_index: i64,
    #[serde(default)]
    delivery_line_1: String,
    #[serde(default)]
    last_line: String,
    #[serde(default)]
    metadata: CandidateMetadata,
    #[serde(default)]
    analysis: CandidateAnalysis,
}

fn decode_single(mailbox: &Mailbox, body: &[u8]) -> Result<Mailbox, ValidatorError> {
    let candidates: Vec<Candidate> =
        serde_json::from_slice(body).context("decode validator response")?;
    let Some(first) = candidates.first() else {
        return Err(ValidatorError::NoCandidates);
    };

    let mut enriched = mailbox.clone();
    enriched.standardized_address = crate::util::clean_standardized(&StandardizedAddress {
        delivery_line1: first.delivery_line_1.clone(),
        last_line: first.last_line.clone(),
    });
    enriched.cmra = first.analysis.dpv_cmra.clone();
    enriched.rdi = first.metadata.rdi.clone();
    enriched.last_validated_at = Some(Utc::now());
    Ok(enriched)
}

/// Decode a sparse batch response: only recognized addresses appear, keyed by
/// `input_index`. Unrecognized entries keep their original fields.
fn decode_batch(chunk: &[Mailbox], body: &[u8]) -> Result<Vec<Mailbox>, ValidatorError> {
    let candidates: Vec<BatchCandidate> =
        serde_json::from_slice(body).context("decode validator batch response")?;

    let mut results: Vec<Mailbox> = chunk.to_vec();
    let now = Utc::now();

    for candidate in candidates {
        let Ok(index) = usize::try_from(candidate.input_index) else {
            continue;
        };
        let Some(entry) = results.get_mut(index) else {
            continue;
        };
        entry.standardized_address = crate::util::clean_standardized(&StandardizedAddress {
            delivery_line1: candidate.delivery_line_1,
            last_line: candidate.last_line,
        });
        entry.cmra = candidate.analysis.dpv_cmra;
        entry.rdi = candidate.metadata.rdi;
        entry.last_validated_at = Some(now);
    }

    Ok(results)
}
