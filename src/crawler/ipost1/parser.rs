//! Parser for iPost1 location-card fragments.
//!
//! Each mailbox is an `<article class="mail-center-card">` with the name,
//! labeled address lines, plan pricing, and a checkout link.

use scraper::{ElementRef, Html, Selector};

use crate::models::{AddressRaw, Mailbox, Source};
use crate::util;

use super::client::BASE_URL;
use crate::crawler::parse_price;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid static selector")
}

/// Extract mailbox records from a locations fragment. Cards missing a name,
/// street, or city after cleaning are dropped.
pub fn parse_locations_html(fragment: &str) -> Vec<Mailbox> {
    if fragment.is_empty() {
        return Vec::new();
    }

    let document = Html::parse_document(fragment);
    let card_sel = selector("article.mail-center-card");
    let name_sel = selector(".store-name");
    let street_sel = selector(".store-street-address");
    let city_state_zip_sel = selector(".store-city-state-zip");
    let price_sel = selector(".store-plan-desktop b");
    let link_sel = selector(r#"a[href*="secure_checkout"]"#);

    let mut mailboxes = Vec::new();

    for card in document.select(&card_sel) {
        let name = select_text(&card, &name_sel);
        let street = strip_label(&select_text(&card, &street_sel));
        let city_state_zip = strip_label(&select_text(&card, &city_state_zip_sel));
        let (city, state, zip) = parse_city_state_zip(&city_state_zip);

        let price = parse_price(&select_text(&card, &price_sel));

        let mut link = card
            .select(&link_sel)
            .next()
            .and_then(|el| el.value().attr("href"))
            .unwrap_or_default()
            .to_string();
        if !link.is_empty() && !link.starts_with("http") {
            link = format!("{BASE_URL}{link}");
        }

        let name = util::clean_field(&name);
        let address = util::clean_address(&AddressRaw {
            street,
            city,
            state,
            zip,
        });

        if name.is_empty() || address.street.is_empty() || address.city.is_empty() {
            continue;
        }

        let mut mailbox = Mailbox::new(Source::Ipost1);
        mailbox.name = name;
        mailbox.address_raw = address;
        mailbox.price = price;
        mailbox.link = util::clean_link(&link);
        mailboxes.push(mailbox);
    }

    mailboxes
}

fn select_text(card: &ElementRef<'_>, sel: &Selector) -> String {
    card.select(sel)
        .next()
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Drop a leading field label, keeping only the value.
/// Example: "Street Address: 123 Main St" -> "123 Main St".
fn strip_label(text: &str) -> String {
    let mut out = text.to_string();
    for label in ["Street Address:", "City, State Zip:", "Address:"] {
        out = out.replacen(label, "", 1);
    }
    out.trim().to_string()
}

/// Split "San Francisco, CA 94102" into its parts.
fn parse_city_state_zip(input: &str) -> (String, String, String) {
    let input = input.trim();
    let Some((city, state_zip)) = input.split_once(',') else {
        return (String::new(), String::new(), String::new());
    };

    let mut fields = state_zip.split_whitespace();
    (
        city.trim().to_string(),
        fields.next().unwrap_or_default().to_string(),
        fields.next().unwrap_or_default().to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENT: &str = r#"
        <div class="results">
          <article class="mail-center-card">
            <h3 class="store-name">iPostal1 San Francisco</h3>
            <div class="store-street-address"><span>Street Address:</span> 584 Castro St</div>
            <div class="store-city-state-zip"><span>City, State Zip:</span> San Francisco, CA 94114</div>
            <div class="store-plan-desktop">from <b>$9.99/month</b></div>
            <a href="/secure_checkout?store=101">Select</a>
          </article>
          <article class="mail-center-card">
            <h3 class="store-name">iPostal1 Oakland</h3>
            <div class="store-street-address"><span>Street Address:</span> 1 Broadway Ave</div>
            <div class="store-city-state-zip"><span>City, State Zip:</span> Oakland, CA 94607</div>
            <div class="store-plan-desktop">from <b>$15.95/month</b></div>
            <a href="https://ipostal1.com/secure_checkout?store=102">Select</a>
          </article>
          <article class="mail-center-card">
            <h3 class="store-name">Broken Card</h3>
            <div class="store-city-state-zip"><span>City, State Zip:</span> Nowhere, ZZ 00000</div>
          </article>
        </div>
    "#;

    #[test]
    fn test_parse_cards() {
        let got = parse_locations_html(FRAGMENT);
        assert_eq!(got.len(), 2, "card without street must be dropped");

        let first = &got[0];
        assert_eq!(first.name, "iPostal1 San Francisco");
        assert_eq!(first.address_raw.street, "584 Castro St");
        assert_eq!(first.address_raw.city, "San Francisco");
        assert_eq!(first.address_raw.state, "CA");
        assert_eq!(first.address_raw.zip, "94114");
        assert_eq!(first.price, 9.99);
        assert_eq!(first.link, "https://ipostal1.com/secure_checkout?store=101");
        assert_eq!(first.source, Source::Ipost1);

        let second = &got[1];
        assert_eq!(second.price, 15.95);
        assert_eq!(second.link, "https://ipostal1.com/secure_checkout?store=102");
    }

    #[test]
    fn test_parse_empty_fragment() {
        assert!(parse_locations_html("").is_empty());
        assert!(parse_locations_html("<div>no cards here</div>").is_empty());
    }

    #[test]
    fn test_parse_city_state_zip() {
        assert_eq!(
            parse_city_state_zip("San Francisco, CA 94102"),
            (
                "San Francisco".to_string(),
                "CA".to_string(),
                "94102".to_string()
            )
        );
        assert_eq!(
            parse_city_state_zip("no comma here"),
            (String::new(), String::new(), String::new())
        );
        assert_eq!(
            parse_city_state_zip(""),
            (String::new(), String::new(), String::new())
        );
    }
}
