//! Link discovery for ATMB listing pages.
//!
//! Seeds point at state listing pages (`/l/usa`, `/l/usa/il`); each listing
//! page links to the detail pages we actually scrape.

use std::collections::HashSet;

use anyhow::Context;
use scraper::{Html, Selector};
use tracing::debug;

use super::PageFetcher;

/// Fetch each seed listing page and collect unique detail URLs, in
/// first-seen order.
pub async fn discover_links(
    fetcher: &dyn PageFetcher,
    seeds: &[String],
) -> anyhow::Result<Vec<String>> {
    let link_selector = Selector::parse("a").expect("valid static selector");

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for seed in seeds {
        let body = fetcher
            .fetch(seed)
            .await
            .with_context(|| format!("fetch seed {seed}"))?;
        let html = String::from_utf8_lossy(&body);
        let document = Html::parse_document(&html);

        for el in document.select(&link_selector) {
            let Some(href) = el.value().attr("href") else {
                continue;
            };
            let href = href.trim();
            if href.is_empty() || !href.contains("/locations/") {
                continue;
            }
            if seen.insert(href.to_string()) {
                links.push(href.to_string());
            }
        }
        debug!(seed = %seed, total = links.len(), "discovered detail links");
    }

    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedFetcher {
        body: &'static str,
    }

    #[async_trait]
    impl PageFetcher for FixedFetcher {
        async fn fetch(&self, _url: &str) -> anyhow::Result<Vec<u8>> {
            Ok(self.body.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn test_discover_filters_and_dedupes() {
        let fetcher = FixedFetcher {
            body: r#"<html><body>
                <a href="/about">About</a>
                <a href="https://www.anytimemailbox.com/locations/chicago-monroe-st">Chicago</a>
                <a href="https://www.anytimemailbox.com/locations/dover-main-st">Dover</a>
                <a href="https://www.anytimemailbox.com/locations/chicago-monroe-st">Chicago again</a>
                <a href="">empty</a>
                <a>no href</a>
            </body></html>"#,
        };

        let links = discover_links(&fetcher, &["https://seed.example/l/usa".to_string()])
            .await
            .unwrap();
        assert_eq!(
            links,
            vec![
                "https://www.anytimemailbox.com/locations/chicago-monroe-st",
                "https://www.anytimemailbox.com/locations/dover-main-st",
            ]
        );
    }

    #[tokio::test]
    async fn test_discover_seed_failure_is_fatal() {
        struct FailingFetcher;

        #[async_trait]
        impl PageFetcher for FailingFetcher {
            async fn fetch(&self, _url: &str) -> anyhow::Result<Vec<u8>> {
                anyhow::bail!("connection refused")
            }
        }

        let err = discover_links(&FailingFetcher, &["https://seed.example".to_string()]).await;
        assert!(err.is_err());
    }
}
