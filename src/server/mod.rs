//! HTTP API for dashboards and run control.
//!
//! Read surface: mailbox listing/export and system stats. Control surface:
//! start crawl/reprocess runs, inspect run status, cancel runs.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::crawler::ipost1::BrowserClient;
use crate::crawler::{HttpFetcher, Service};
use crate::repository::{MailboxRepository, RunRepository, StatsRepository};
use crate::validator::{SmartyClient, SmartyConfig};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub mailboxes: Arc<MailboxRepository>,
    pub runs: Arc<RunRepository>,
    pub stats: Arc<StatsRepository>,
    pub service: Arc<Service>,
}

impl AppState {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let mailboxes = Arc::new(MailboxRepository::new(&cfg.database_path)?);
        let runs = Arc::new(RunRepository::new(&cfg.database_path)?);
        let stats = Arc::new(StatsRepository::new(&cfg.database_path)?);

        let validator = Arc::new(SmartyClient::new(SmartyConfig {
            auth_ids: cfg.smarty_auth_ids.clone(),
            auth_tokens: cfg.smarty_auth_tokens.clone(),
            mock: cfg.smarty_mock,
            ..Default::default()
        }));

        let service = Arc::new(Service::new(
            Arc::new(HttpFetcher::new()),
            validator,
            Arc::new(BrowserClient::new()),
            mailboxes.clone(),
            runs.clone(),
            stats.clone(),
            cfg.crawl_link_seeds.clone(),
        ));

        Ok(Self {
            mailboxes,
            runs,
            stats,
            service,
        })
    }
}

/// Start the HTTP server; runs until ctrl-c.
pub async fn serve(cfg: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(cfg)?;
    let app = create_router(state, &cfg.allowed_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!("listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::crawler::ipost1::{Ipost1Client, StateEntry};
    use crate::crawler::PageFetcher;

    const SAMPLE: &str = include_str!("../crawler/testdata/atmb_detail.html");
    const SAMPLE_LINK: &str = "https://www.anytimemailbox.com/locations/chicago-monroe-st";

    struct FixtureFetcher;

    #[async_trait]
    impl PageFetcher for FixtureFetcher {
        async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
            Ok(SAMPLE.replace(SAMPLE_LINK, url).into_bytes())
        }
    }

    struct EmptyIpost1;

    #[async_trait]
    impl Ipost1Client for EmptyIpost1 {
        async fn states(&self) -> anyhow::Result<Vec<StateEntry>> {
            Ok(Vec::new())
        }

        async fn locations_display(&self, _state_id: &str) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    fn setup_test_app() -> (axum::Router, AppState, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");

        let mailboxes = Arc::new(MailboxRepository::new(&db).unwrap());
        let runs = Arc::new(RunRepository::new(&db).unwrap());
        let stats = Arc::new(StatsRepository::new(&db).unwrap());
        let validator = Arc::new(SmartyClient::new(SmartyConfig {
            mock: true,
            ..Default::default()
        }));
        let service = Arc::new(Service::new(
            Arc::new(FixtureFetcher),
            validator,
            Arc::new(EmptyIpost1),
            mailboxes.clone(),
            runs.clone(),
            stats.clone(),
            Vec::new(),
        ));

        let state = AppState {
            mailboxes,
            runs,
            stats,
            service,
        };
        let app = create_router(state.clone(), "*");
        (app, state, dir)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn wait_terminal(state: &AppState, run_id: &str) {
        for _ in 0..200 {
            let run = state.runs.get_run(run_id).unwrap();
            if run.status.is_terminal() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("run {run_id} never finished");
    }

    #[tokio::test]
    async fn test_healthz() {
        let (app, _state, _dir) = setup_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_list_mailboxes_empty() {
        let (app, _state, _dir) = setup_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/mailboxes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["total"], 0);
        assert_eq!(json["page"], 1);
        assert!(json["items"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_mailboxes_rejects_unknown_source() {
        let (app, _state, _dir) = setup_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/mailboxes?source=Nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_crawl_run_end_to_end() {
        let (app, state, _dir) = setup_test_app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/crawl/run")
                    .header("content-type", "application/json")
                    .body(Body::from(format!(r#"{{"links":["{SAMPLE_LINK}"]}}"#)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let run_id = json["runId"].as_str().unwrap().to_string();

        wait_terminal(&state, &run_id).await;

        // Status endpoint reports the terminal run.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/crawl/status?runId={run_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["stats"]["found"], 1);

        // The mailbox is now listed (with mock enrichment).
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/mailboxes?active=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["total"], 1);
        assert_eq!(json["items"][0]["cmra"], "Y");
        // The page body is not exposed through the API.
        assert!(json["items"][0].get("rawHtml").is_none());

        // The rollup ran, so stats are available.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["totalMailboxes"], 1);

        // Export carries the record.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/mailboxes/export")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        assert!(content_type.contains("csv"));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let csv = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(csv.starts_with("name,street,city,state,zip,price,link,cmra,rdi"));
        assert!(csv.contains("Chicago - Monroe St"));

        // Runs listing includes the run.
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/crawl/runs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert!(!json["items"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_crawl_without_links_or_seeds_is_bad_request() {
        let (app, _state, _dir) = setup_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/crawl/run")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_crawl_status_requires_run_id() {
        let (app, _state, _dir) = setup_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/crawl/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_refresh_on_empty_store() {
        let (app, _state, _dir) = setup_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/stats/refresh")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["totalMailboxes"], 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_run_is_bad_request() {
        let (app, _state, _dir) = setup_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/crawl/cancel?runId=RUN_NOPE")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reprocess_endpoint_starts_run() {
        let (app, state, _dir) = setup_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/crawl/reprocess")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"onlyOutdated":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let run_id = json["runId"].as_str().unwrap().to_string();
        wait_terminal(&state, &run_id).await;
        let run = state.runs.get_run(&run_id).unwrap();
        assert_eq!(run.status, crate::models::RunStatus::Success);
    }
}
