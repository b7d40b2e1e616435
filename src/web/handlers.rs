//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, HistoryRange, ProbeHistory, ProbeStore, Summary, Target};
use crate::scheduler::ScheduleInterval;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::de::{value::StrDeserializer, IntoDeserializer};
use serde::{Deserialize, Serialize};

/// History entries shown when no range is requested.
const DEFAULT_HISTORY_LIMIT: i64 = 30;
const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 200;

// ============================================================================
// API: Targets
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TargetView {
    #[serde(flatten)]
    pub target: Target,
    pub is_up: bool,
    pub average_latency_ms: Option<i64>,
    pub uptime_seconds: Option<i64>,
}

impl TargetView {
    fn new(target: Target, now: DateTime<Utc>) -> Self {
        Self {
            is_up: target.is_up(),
            average_latency_ms: target.average_latency_ms(),
            uptime_seconds: target.uptime(now).map(|d| d.num_seconds()),
            target,
        }
    }
}

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    match state.store.get_all_targets() {
        Ok(targets) => {
            let views: Vec<TargetView> = targets.into_iter().map(|t| TargetView::new(t, now)).collect();
            Json(views).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    pub url: String,
}

/// Trim the URL and default to https when no scheme is given.
pub fn normalize_url(raw: &str) -> Option<String> {
    let url = raw.trim();
    if url.is_empty() {
        return None;
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        Some(url.to_string())
    } else {
        Some(format!("https://{}", url))
    }
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<CreateTargetRequest>,
) -> impl IntoResponse {
    let Some(url) = normalize_url(&req.url) else {
        return (StatusCode::BAD_REQUEST, "url is required").into_response();
    };

    match state.store.add_target(&url) {
        Ok(target) => {
            tracing::info!("Added target {} ({})", target.id, target.url);
            (StatusCode::CREATED, Json(target)).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_delete_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    if let Err(e) = state.store.delete_probe_history(id) {
        tracing::error!("Failed to delete history for target {}: {}", id, e);
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    match state.store.delete_target(id) {
        Ok(_) => {
            tracing::info!("Deleted target {}", id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(DbError::NotFound) => (StatusCode::NOT_FOUND, "Target not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: History
// ============================================================================

/// Kept as raw strings so a malformed value falls back instead of failing
/// the request.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub range: Option<String>,
}

impl HistoryQuery {
    pub fn target_id(&self) -> Option<i64> {
        self.target_id.as_deref()?.trim().parse().ok()
    }

    pub fn range(&self) -> Option<HistoryRange> {
        let de: StrDeserializer<'_, serde::de::value::Error> = self.range.as_deref()?.into_deserializer();
        HistoryRange::deserialize(de).ok()
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub target_id: Option<i64>,
    pub history: Vec<ProbeHistory>,
}

pub async fn handle_get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    // Without an explicit target, show the first one.
    let target_id = match query.target_id() {
        Some(id) => Some(id),
        None => match state.store.get_all_targets() {
            Ok(targets) => targets.first().map(|t| t.id),
            Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        },
    };

    let Some(id) = target_id else {
        return Json(HistoryResponse {
            target_id: None,
            history: vec![],
        })
        .into_response();
    };

    let history = match query.range() {
        Some(range) => state.store.get_probe_history_since(id, range.since(Utc::now())),
        None => state.store.get_probe_history(id, DEFAULT_HISTORY_LIMIT),
    };

    match history {
        Ok(history) => Json(HistoryResponse {
            target_id: Some(id),
            history,
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub size: Option<i64>,
}

/// A validated page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: i64,
    pub size: i64,
}

impl Page {
    /// Out-of-range values fall back to the defaults.
    pub fn from_query(query: &PageQuery) -> Self {
        let size = query
            .size
            .filter(|s| (1..=MAX_PAGE_SIZE).contains(s))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let number = query.page.filter(|p| *p > 0).unwrap_or(1);
        Self { number, size }
    }

    /// Saturates for huge page numbers, which then read past the end.
    pub fn offset(&self) -> i64 {
        (self.number - 1).saturating_mul(self.size)
    }

    pub fn total_pages(&self, total_items: i64) -> i64 {
        (total_items + self.size - 1) / self.size
    }
}

#[derive(Debug, Serialize)]
pub struct PagedHistoryResponse {
    pub page: i64,
    pub size: i64,
    pub total_items: i64,
    pub total_pages: i64,
    pub history: Vec<ProbeHistory>,
}

pub async fn handle_get_all_history(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> impl IntoResponse {
    let page = Page::from_query(&query);

    let total_items = match state.store.count_probe_history() {
        Ok(n) => n,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    match state.store.get_all_probe_history_paged(page.size, page.offset()) {
        Ok(history) => Json(PagedHistoryResponse {
            page: page.number,
            size: page.size,
            total_items,
            total_pages: page.total_pages(total_items),
            history,
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Summary
// ============================================================================

pub async fn handle_get_summary(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_all_targets() {
        Ok(targets) => Json(Summary::from_targets(&targets)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Schedule
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub interval: String,
    pub trigger: String,
    pub allowed: Vec<&'static str>,
}

fn schedule_response(state: &AppState) -> ScheduleResponse {
    ScheduleResponse {
        interval: state.scheduler.interval().to_string(),
        trigger: state.scheduler.active_trigger().to_string(),
        allowed: ScheduleInterval::ALL.iter().map(|i| i.as_str()).collect(),
    }
}

pub async fn handle_get_schedule(State(state): State<AppState>) -> impl IntoResponse {
    Json(schedule_response(&state))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub interval: String,
}

pub async fn handle_update_schedule(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> impl IntoResponse {
    let interval: ScheduleInterval = match req.interval.parse() {
        Ok(i) => i,
        Err(e) => {
            tracing::warn!("Rejected schedule interval {:?}", req.interval);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    if let Err(e) = state.store.set_schedule_interval(interval.as_str()) {
        tracing::error!("Failed to save schedule interval: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    if let Err(e) = state.scheduler.reconfigure(interval.as_str()) {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    Json(schedule_response(&state)).into_response()
}
