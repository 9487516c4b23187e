//! Address cleaning for scraped listing data.
//!
//! Scraped fields arrive with HTML residue (tags, escaped slashes, entities)
//! and frequently repeat the city/state/zip inside the street line. Cleaning
//! is idempotent: `clean_field(clean_field(x)) == clean_field(x)`.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{AddressRaw, StandardizedAddress};

static HTML_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid html tag pattern"));
static MULTI_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Remove HTML remnants and normalize every field of a scraped address,
/// then strip a redundant city/state/zip suffix from the street line.
pub fn clean_address(addr: &AddressRaw) -> AddressRaw {
    let street = clean_field(&addr.street);
    let city = clean_field(&addr.city);
    let state = clean_field(&addr.state);
    let zip = clean_field(&addr.zip);

    let street = remove_redundant_city_state_zip(&street, &city, &state, &zip);

    AddressRaw {
        street,
        city,
        state,
        zip,
    }
}

/// Remove HTML remnants from a validator-standardized address.
pub fn clean_standardized(addr: &StandardizedAddress) -> StandardizedAddress {
    StandardizedAddress {
        delivery_line1: clean_field(&addr.delivery_line1),
        last_line: clean_field(&addr.last_line),
    }
}

/// Fix escaped URLs (e.g. `https:\/\/` -> `https://`).
pub fn clean_link(link: &str) -> String {
    link.replace(r"\/", "/").trim().to_string()
}

/// Remove HTML tags, escape sequences, and entities; collapse whitespace.
pub fn clean_field(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }

    // 1. Fix escaped HTML closing tags: <\/ -> </
    let s = s.replace(r"<\/", "</");

    // 2. Fix escaped forward slashes
    let s = s.replace(r"\/", "/");

    // 3. Remove HTML tags
    let s = HTML_TAG_RE.replace_all(&s, "");

    // 4. Decode common HTML entities
    let s = s
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    // 5. Remove "United States" (country line leaks into city/street fields)
    let s = s.replace("United States", "");

    // 6. Collapse whitespace runs and trim
    MULTI_SPACE_RE.replace_all(&s, " ").trim().to_string()
}

/// Strip a trailing "city, state zip" (and friends) from the street line.
/// Longest suffix wins; matching is case-insensitive.
fn remove_redundant_city_state_zip(street: &str, city: &str, state: &str, zip: &str) -> String {
    if street.is_empty() || (city.is_empty() && state.is_empty()) {
        return street.to_string();
    }

    let mut suffixes = Vec::new();
    if !city.is_empty() && !state.is_empty() && !zip.is_empty() {
        suffixes.push(format!(" {city}, {state} {zip}"));
        suffixes.push(format!(" {city} {state} {zip}"));
    }
    if !state.is_empty() && !zip.is_empty() {
        suffixes.push(format!(", {state} {zip}"));
        suffixes.push(format!(" {state} {zip}"));
    }
    if !city.is_empty() && !state.is_empty() {
        suffixes.push(format!(" {city}, {state}"));
    }

    let street_lower = street.to_lowercase();
    for suffix in &suffixes {
        if street_lower.ends_with(&suffix.to_lowercase()) {
            return street[..street.len() - suffix.len()].trim().to_string();
        }
    }

    street.to_string()
}

/// Conservative predicate: does this address still carry scraper residue?
pub fn needs_cleanup(addr: &AddressRaw) -> bool {
    let fields = [&addr.street, &addr.city, &addr.state, &addr.zip];
    for f in fields {
        if f.contains('<')
            || f.contains(r"\/")
            || f.contains(r"\n")
            || f.contains("United States")
        {
            return true;
        }
    }

    has_redundant_city_state_zip(&addr.street, &addr.city, &addr.state, &addr.zip)
}

fn has_redundant_city_state_zip(street: &str, city: &str, state: &str, zip: &str) -> bool {
    if street.is_empty() || (city.is_empty() && state.is_empty()) {
        return false;
    }

    let street_lower = street.to_lowercase();

    if !city.is_empty() && !state.is_empty() && !zip.is_empty() {
        let with_comma = format!(" {city}, {state} {zip}").to_lowercase();
        let without_comma = format!(" {city} {state} {zip}").to_lowercase();
        if street_lower.ends_with(&with_comma) || street_lower.ends_with(&without_comma) {
            return true;
        }
    }

    if !state.is_empty() && !zip.is_empty() {
        let state_zip = format!(", {state} {zip}").to_lowercase();
        if street_lower.ends_with(&state_zip) {
            return true;
        }
    }

    false
}
