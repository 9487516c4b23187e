//! Crawl run lifecycle records and the aggregate stats singleton.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Source;

/// Lifecycle status of a crawl or reprocess run. Terminal statuses are
/// write-once-final; `finished_at` is set iff the status is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    PartialHalt,
    Timeout,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::PartialHalt => "partial_halt",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "partial_halt" => Some(Self::PartialHalt),
            "timeout" => Some(Self::Timeout),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Aggregated counters for one run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CrawlRunStats {
    #[serde(default)]
    pub found: u64,
    #[serde(default)]
    pub validated: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default)]
    pub failed: u64,
}

/// One captured failure, kept as a bounded tail on the run for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSample {
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub reason: String,
}

/// Tracks the lifecycle of one crawler or reprocess execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRun {
    pub run_id: String,
    pub source: Source,
    pub status: RunStatus,
    #[serde(default)]
    pub stats: CrawlRunStats,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub errors_sample: Vec<ErrorSample>,
}

impl CrawlRun {
    /// A fresh record in `running` status.
    pub fn started(run_id: String, source: Source, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            source,
            status: RunStatus::Running,
            stats: CrawlRunStats::default(),
            started_at: Some(started_at),
            finished_at: None,
            errors_sample: Vec::new(),
        }
    }
}

/// Singleton document that pre-aggregates dashboard metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_mailboxes: u64,
    #[serde(default)]
    pub total_commercial: u64,
    #[serde(default)]
    pub total_residential: u64,
    #[serde(default)]
    pub avg_price: f64,
    #[serde(default)]
    pub by_state: HashMap<String, u64>,
}
