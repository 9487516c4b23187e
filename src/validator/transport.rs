//! HTTP transport abstraction for the validator client.
//!
//! The client talks to the validator through this seam so tests can script
//! responses without a network.

use std::time::Duration;

use async_trait::async_trait;

/// Status and body of one validator HTTP exchange.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Minimal HTTP surface the validator needs.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> anyhow::Result<TransportResponse>;
    async fn post_json(&self, url: &str, body: Vec<u8>) -> anyhow::Result<TransportResponse>;
}

/// Production transport backed by reqwest.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to create validator HTTP client");
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> anyhow::Result<TransportResponse> {
        let resp = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        Ok(TransportResponse { status, body })
    }

    async fn post_json(&self, url: &str, body: Vec<u8>) -> anyhow::Result<TransportResponse> {
        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/json; charset=utf-8")
            .header("Accept", "application/json")
            .body(body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        Ok(TransportResponse { status, body })
    }
}
