//! Mailbox models for listing storage and change detection.
//!
//! A mailbox is one listing on a provider site, keyed by its detail URL.
//! `data_hash` fingerprints the normalized parsed fields so unchanged
//! listings can be skipped on re-crawl.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Listing provider a mailbox was scraped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "ATMB")]
    Atmb,
    #[serde(rename = "iPost1")]
    Ipost1,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Atmb => "ATMB",
            Self::Ipost1 => "iPost1",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ATMB" => Some(Self::Atmb),
            "iPost1" => Some(Self::Ipost1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unstandardized address as scraped from the provider site, post-cleaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRaw {
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub zip: String,
}

/// Normalized address returned by the validator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardizedAddress {
    #[serde(default)]
    pub delivery_line1: String,
    #[serde(default)]
    pub last_line: String,
}

/// The core document stored in the `mailboxes` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mailbox {
    #[serde(default)]
    pub id: String,
    pub source: Source,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address_raw: AddressRaw,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub link: String,
    /// Commercial-Mail-Receiving-Agency flag from the validator: "Y", "N", or "".
    #[serde(default)]
    pub cmra: String,
    /// Residential Delivery Indicator: "Commercial", "Residential", or "".
    #[serde(default)]
    pub rdi: String,
    #[serde(default)]
    pub standardized_address: StandardizedAddress,
    #[serde(default)]
    pub data_hash: String,
    #[serde(default)]
    pub last_validated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub crawl_run_id: String,
    #[serde(default)]
    pub active: bool,
    /// Original page body kept for reprocessing; never exposed through the API.
    #[serde(skip)]
    pub raw_html: String,
    #[serde(default)]
    pub parser_version: String,
    #[serde(default)]
    pub last_parsed_at: Option<DateTime<Utc>>,
}

impl Mailbox {
    /// An empty record for the given source; fields are filled in by the
    /// parser and the pipeline.
    pub fn new(source: Source) -> Self {
        Self {
            id: String::new(),
            source,
            name: String::new(),
            address_raw: AddressRaw::default(),
            price: 0.0,
            link: String::new(),
            cmra: String::new(),
            rdi: String::new(),
            standardized_address: StandardizedAddress::default(),
            data_hash: String::new(),
            last_validated_at: None,
            crawl_run_id: String::new(),
            active: false,
            raw_html: String::new(),
            parser_version: String::new(),
            last_parsed_at: None,
        }
    }

    /// Whether the record still needs validator enrichment.
    pub fn needs_validation(&self) -> bool {
        self.cmra.is_empty() || self.rdi.is_empty()
    }
}
