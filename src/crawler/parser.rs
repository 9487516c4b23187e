//! ATMB detail-page parser.
//!
//! Listing pages carry the mailbox name in the `h1`, address lines inside
//! `.t-text`, plan pricing in `.t-plan .t-price`, and a canonical store link.

use std::sync::LazyLock;

use anyhow::bail;
use regex::Regex;
use scraper::{Html, Selector};

use crate::models::{AddressRaw, Mailbox, Source};
use crate::util;

static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid price pattern"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid static selector")
}

/// Address lines that are labels or placeholders, not data.
const SKIPPED_LINES: [&str; 4] = [
    "United States",
    "Your Real Street Address",
    "YOUR NAME",
    "Vanity Address",
];

/// Extract a mailbox record from one detail page.
///
/// Returns an error for unparseable pages and for pages that do not yield a
/// name, street, and city after cleaning; the caller counts both as failed.
pub fn parse_mailbox_html(body: &[u8], source_link: &str, source: Source) -> anyhow::Result<Mailbox> {
    let html = String::from_utf8_lossy(body);
    let document = Html::parse_document(&html);

    let name = document
        .select(&selector("h1"))
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    // Address block layout:
    //   "Your Real Street Address"   (label)
    //   "YOUR NAME"                  (placeholder)
    //   "73 W Monroe St"             (street)
    //   "5th Floor #MAILBOX"         (suite, optional)
    //   "Chicago, IL 60603"          (city, state zip)
    //   "United States"              (country)
    let mut address_lines: Vec<String> = Vec::new();
    for el in document.select(&selector(".t-text > div")) {
        let text = el.text().collect::<String>().trim().to_string();
        if !text.is_empty() && !SKIPPED_LINES.contains(&text.as_str()) {
            address_lines.push(text);
        }
    }

    let mut street = String::new();
    let mut city = String::new();
    let mut state = String::new();
    let mut zip = String::new();
    if address_lines.len() >= 2 {
        street = address_lines[0].clone();
        let city_state_zip = &address_lines[address_lines.len() - 1];
        if let Some((city_part, state_zip)) = city_state_zip.split_once(',') {
            city = city_part.trim().to_string();
            let mut fields = state_zip.split_whitespace();
            state = fields.next().unwrap_or_default().to_string();
            zip = fields.next().unwrap_or_default().to_string();
        }
    }

    let price_raw = document
        .select(&selector(".t-plan .t-price"))
        .next()
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default();
    let price = parse_price(&price_raw);

    let link = document
        .select(&selector("a.store-link"))
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .unwrap_or(source_link);

    let name = util::clean_field(&name);
    let address = util::clean_address(&AddressRaw {
        street,
        city,
        state,
        zip,
    });

    if name.is_empty() || address.street.is_empty() || address.city.is_empty() {
        bail!("page yields no mailbox (name/street/city empty after cleaning)");
    }

    let mut mailbox = Mailbox::new(source);
    mailbox.name = name;
    mailbox.address_raw = address;
    mailbox.price = price;
    mailbox.link = util::clean_link(link);
    mailbox.active = true;
    Ok(mailbox)
}

/// First decimal numeric substring of a currency string; 0 when missing.
pub fn parse_price(raw: &str) -> f64 {
    PRICE_RE
        .find(raw)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
}
