//! HTTP handlers for the dashboard read/control API.
//!
//! 200 on success, 400 for validation errors, 500 for infrastructure
//! errors; error bodies are `{"error": "..."}`.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::crawler::ReprocessOptions;
use crate::models::Source;
use crate::repository::MailboxQuery;

use super::AppState;

fn bad_request(msg: impl ToString) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": msg.to_string() })),
    )
        .into_response()
}

fn internal_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("{err:#}") })),
    )
        .into_response()
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMailboxesQuery {
    pub state: Option<String>,
    pub cmra: Option<String>,
    pub rdi: Option<String>,
    pub source: Option<String>,
    pub active: Option<bool>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
}

pub async fn list_mailboxes(
    State(state): State<AppState>,
    Query(params): Query<ListMailboxesQuery>,
) -> Response {
    let source = match params.source.as_deref() {
        None | Some("") => None,
        Some(raw) => match Source::parse(raw) {
            Some(source) => Some(source),
            None => return bad_request(format!("unknown source {raw:?}")),
        },
    };

    let page = params.page.max(1);
    let query = MailboxQuery {
        state: params.state.filter(|s| !s.is_empty()),
        cmra: params.cmra.filter(|s| !s.is_empty()),
        rdi: params.rdi.filter(|s| !s.is_empty()),
        source,
        active: params.active,
        page,
        page_size: params.page_size,
    };

    match state.mailboxes.list(&query) {
        Ok((items, total)) => Json(json!({
            "items": items,
            "total": total,
            "page": page,
        }))
        .into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub active: Option<bool>,
}

pub async fn export_mailboxes(
    State(state): State<AppState>,
    Query(params): Query<ExportQuery>,
) -> Response {
    let mut output = Vec::new();
    output.extend_from_slice(b"name,street,city,state,zip,price,link,cmra,rdi\n");

    let result = state
        .mailboxes
        .stream_all(params.active.unwrap_or(true), |mb| {
            let row = [
                escape_csv(&mb.name),
                escape_csv(&mb.address_raw.street),
                escape_csv(&mb.address_raw.city),
                escape_csv(&mb.address_raw.state),
                escape_csv(&mb.address_raw.zip),
                format!("{:.2}", mb.price),
                escape_csv(&mb.link),
                escape_csv(&mb.cmra),
                escape_csv(&mb.rdi),
            ];
            output.extend_from_slice(row.join(",").as_bytes());
            output.push(b'\n');
            Ok(())
        });

    match result {
        Ok(()) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/csv")
            .header(
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"mailboxes.csv\"",
            )
            .body(Body::from(output))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(err) => internal_error(err),
    }
}

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub async fn get_stats(State(state): State<AppState>) -> Response {
    match state.stats.get_system_stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => internal_error(err),
    }
}

pub async fn refresh_stats(State(state): State<AppState>) -> Response {
    match state.service.refresh_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StartCrawlRequest {
    #[serde(default)]
    pub links: Vec<String>,
}

pub async fn start_crawl(
    State(state): State<AppState>,
    body: Option<Json<StartCrawlRequest>>,
) -> Response {
    let links = body.map(|Json(req)| req.links).unwrap_or_default();
    match state.service.start_crawl(links) {
        Ok(run_id) => Json(json!({ "runId": run_id })).into_response(),
        Err(err) => bad_request(format!("{err:#}")),
    }
}

pub async fn start_ipost1_crawl(State(state): State<AppState>) -> Response {
    match state.service.start_ipost1_crawl() {
        Ok(run_id) => Json(json!({ "runId": run_id })).into_response(),
        Err(err) => bad_request(format!("{err:#}")),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReprocessRequest {
    pub target_version: Option<String>,
    #[serde(default)]
    pub only_outdated: bool,
    #[serde(default)]
    pub force_revalidate: bool,
}

pub async fn start_reprocess(
    State(state): State<AppState>,
    body: Option<Json<ReprocessRequest>>,
) -> Response {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let opts = ReprocessOptions {
        target_version: req.target_version,
        only_outdated: req.only_outdated,
        force_revalidate: req.force_revalidate,
        since_time: None,
    };
    match state.service.start_reprocess(opts) {
        Ok(run_id) => Json(json!({ "runId": run_id })).into_response(),
        Err(err) => bad_request(format!("{err:#}")),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunIdQuery {
    pub run_id: Option<String>,
}

pub async fn crawl_status(
    State(state): State<AppState>,
    Query(params): Query<RunIdQuery>,
) -> Response {
    let Some(run_id) = params.run_id.filter(|id| !id.is_empty()) else {
        return bad_request("runId is required");
    };
    match state.runs.get_run(&run_id) {
        Ok(run) => Json(run).into_response(),
        Err(err) => internal_error(err),
    }
}

pub async fn list_crawl_runs(State(state): State<AppState>) -> Response {
    match state.runs.list_runs(20) {
        Ok(items) => Json(json!({ "items": items })).into_response(),
        Err(err) => internal_error(err),
    }
}

pub async fn cancel_crawl(
    State(state): State<AppState>,
    Query(params): Query<RunIdQuery>,
) -> Response {
    let Some(run_id) = params.run_id.filter(|id| !id.is_empty()) else {
        return bad_request("runId is required");
    };
    match state.service.cancel_run(&run_id) {
        Ok(()) => Json(json!({ "runId": run_id, "cancelled": true })).into_response(),
        Err(err) => bad_request(format!("{err:#}")),
    }
}
