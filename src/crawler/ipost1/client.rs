//! Browser-backed client for the iPost1 locations API.
//!
//! The site blocks plain HTTP clients, so requests go through a headless
//! Chromium session (warmed up on the homepage first). The locations
//! endpoint returns a JSON-ish envelope that no standard parser accepts;
//! [`extract_display_html`] pulls the `display` HTML out with string
//! surgery instead.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const BASE_URL: &str = "https://ipostal1.com";
const STATES_ENDPOINT: &str = "/locations_ajax.php?action=get_states_list&country_id=223";
const LOCATIONS_ENDPOINT: &str = "/locations_ajax.php?action=get_mail_centers&state_id={id}&country_id=223";

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Wait after hitting the homepage so the bot-wall challenge can settle.
const WARMUP_WAIT: Duration = Duration::from_secs(8);
/// Wait after navigating to an API endpoint before reading the body.
const ENDPOINT_WAIT: Duration = Duration::from_secs(3);

/// A US state/territory as listed by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct StateEntry {
    pub id: String,
    pub name: String,
}

/// Client seam for iPost1 so the discovery pipeline is testable without a
/// browser.
#[async_trait]
pub trait Ipost1Client: Send + Sync {
    async fn states(&self) -> anyhow::Result<Vec<StateEntry>>;

    /// Envelope-stripped HTML fragment with the mailbox cards for a state.
    /// Empty when the state has no locations.
    async fn locations_display(&self, state_id: &str) -> anyhow::Result<String>;
}

struct BrowserSession {
    browser: Browser,
    page: Page,
    warmed_up: bool,
}

/// Headless-Chromium implementation of [`Ipost1Client`].
pub struct BrowserClient {
    session: Mutex<Option<BrowserSession>>,
}

impl BrowserClient {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
        }
    }

    async fn launch() -> anyhow::Result<BrowserSession> {
        info!("launching headless browser for iPost1");
        let config = BrowserConfig::builder()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={USER_AGENT}"))
            .window_size(1920, 1080)
            .build()
            .map_err(|e| anyhow::anyhow!("build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("launch browser")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("open browser page")?;

        Ok(BrowserSession {
            browser,
            page,
            warmed_up: false,
        })
    }

    /// Navigate and return the page body text after a settle delay.
    async fn fetch_body(&self, path: &str, wait: Duration) -> anyhow::Result<String> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(Self::launch().await?);
        }
        let session = guard.as_mut().expect("session just initialized");

        // Establish a session on the homepage first so the bot wall clears.
        if !session.warmed_up {
            debug!("warming up iPost1 session on homepage");
            session
                .page
                .goto(BASE_URL)
                .await
                .context("navigate to homepage")?;
            tokio::time::sleep(WARMUP_WAIT).await;
            session.warmed_up = true;
        }

        let url = format!("{BASE_URL}{path}");
        session
            .page
            .goto(url.as_str())
            .await
            .with_context(|| format!("navigate to {url}"))?;
        tokio::time::sleep(wait).await;

        let body = session
            .page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .context("read page body")?
            .into_value::<String>()
            .context("decode page body")?;
        Ok(body)
    }

    /// Tear down the browser session, if one was launched.
    pub async fn shutdown(&self) {
        let mut guard = self.session.lock().await;
        if let Some(mut session) = guard.take() {
            let _ = session.browser.close().await;
        }
    }
}

impl Default for BrowserClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ipost1Client for BrowserClient {
    async fn states(&self) -> anyhow::Result<Vec<StateEntry>> {
        let body = self.fetch_body(STATES_ENDPOINT, ENDPOINT_WAIT).await?;
        let states: Vec<StateEntry> =
            serde_json::from_str(body.trim()).context("parse states list")?;
        Ok(states)
    }

    async fn locations_display(&self, state_id: &str) -> anyhow::Result<String> {
        let path = LOCATIONS_ENDPOINT.replace("{id}", state_id);
        let body = self.fetch_body(&path, ENDPOINT_WAIT).await?;
        Ok(extract_display_html(&body)
            .with_context(|| format!("extract display for state {state_id}"))?
            .unwrap_or_default())
    }
}

/// Pull the `display` HTML out of the locations envelope.
///
/// The envelope looks like
/// `{"num_results":N,...,"display":"<html...>","searched":"","back":"..."}`
/// but the `display` value mixes `\"` with literal `&quot;`, which breaks
/// every JSON parser. Returns `Ok(None)` when the field is absent (an empty
/// result), and an error when the envelope is truncated.
pub fn extract_display_html(raw: &str) -> anyhow::Result<Option<String>> {
    const DISPLAY_MARKER: &str = r#""display":""#;
    const END_MARKER: &str = r#"","searched""#;

    let Some(start) = raw.find(DISPLAY_MARKER) else {
        return Ok(None);
    };
    let start = start + DISPLAY_MARKER.len();

    let Some(end) = raw[start..].find(END_MARKER) else {
        bail!("malformed locations envelope: no searched field");
    };

    let display = &raw[start..start + end];

    // Unescape in a fixed order. The extraneous \&quot; sequences go first,
    // then bare &quot;, then the standard JSON escapes.
    let display = display
        .replace(r"\&quot;", "")
        .replace("&quot;", "")
        .replace(r"\\", r"\")
        .replace(r"\/", "/")
        .replace(r"\n", "\n")
        .replace(r#"\""#, "\"");

    Ok(Some(display))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_display_html() {
        let raw = r#"{"num_results":1,"num_results_text":"1 location","display":"<article class=\"mail-center-card\">\n<span>123 Main<\/span><\/article>","searched":"","back":"x"}"#;
        let got = extract_display_html(raw).unwrap().unwrap();
        assert_eq!(
            got,
            "<article class=\"mail-center-card\">\n<span>123 Main</span></article>"
        );
    }

    #[test]
    fn test_extract_display_removes_stray_quot_entities() {
        let raw = r#"{"display":"<a href=\&quot;x\&quot; title=&quot;y&quot;>z</a>","searched":""}"#;
        let got = extract_display_html(raw).unwrap().unwrap();
        assert_eq!(got, "<a href=x title=y>z</a>");
    }

    #[test]
    fn test_extract_display_absent_is_empty_result() {
        let raw = r#"{"num_results":0,"num_results_text":"no locations"}"#;
        assert!(extract_display_html(raw).unwrap().is_none());
    }

    #[test]
    fn test_extract_display_truncated_envelope_is_error() {
        let raw = r#"{"display":"<article>truncated"#;
        assert!(extract_display_html(raw).is_err());
    }

    #[test]
    fn test_extract_display_unescapes_backslashes() {
        let raw = r#"{"display":"a\\b\nc","searched":""}"#;
        let got = extract_display_html(raw).unwrap().unwrap();
        assert_eq!(got, "a\\b\nc");
    }
}
