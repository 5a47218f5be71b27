//! HTTP request handlers.

use super::AppState;
use crate::history::{HistoryEntry, HistoryStatistics, HistorySummary, PARTITION_DATE_FORMAT};
use crate::probe::{CheckResult, Probe, ProbeType};
use crate::scheduler::SchedulerError;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const DEFAULT_HISTORY_DAYS: u32 = 7;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    #[derive(Serialize)]
    struct ErrorBody {
        error: String,
    }

    (status, Json(ErrorBody { error: message.into() })).into_response()
}

fn probe_not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "probe not found")
}

/// A date query parameter. An unparseable value is kept so it can be echoed
/// back; it matches no partition.
fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>, chrono::ParseError> {
    raw.map(|s| NaiveDate::parse_from_str(s, PARTITION_DATE_FORMAT)).transpose()
}

fn display_date(raw: Option<&str>) -> String {
    match raw {
        Some(raw) => raw.to_string(),
        None => Local::now().format(PARTITION_DATE_FORMAT).to_string(),
    }
}

// ============================================================================
// Health and status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Local>,
    pub monitoring_active: bool,
    pub probes_count: usize,
    /// Snapshot interval in seconds.
    pub history_interval: f64,
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let scheduler = &state.scheduler;
    Json(HealthResponse {
        status: "healthy",
        timestamp: Local::now(),
        monitoring_active: scheduler.is_running(),
        probes_count: scheduler.probes().await.len(),
        history_interval: scheduler.history_interval().as_secs_f64(),
    })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub timestamp: DateTime<Local>,
    pub probes: HashMap<String, CheckResult>,
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        timestamp: Local::now(),
        probes: state.scheduler.current_status().await,
    })
}

pub async fn handle_probe_status(State(state): State<AppState>, Path(probe_id): Path<String>) -> Response {
    match state.scheduler.probe_status(&probe_id).await {
        Some(result) => Json(result).into_response(),
        None => probe_not_found(),
    }
}

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub date: Option<String>,
    pub probe_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub date: String,
    pub probe_id: Option<String>,
    pub history: Vec<HistoryEntry>,
}

pub async fn handle_history(State(state): State<AppState>, Query(query): Query<HistoryQuery>) -> impl IntoResponse {
    let history = match parse_date(query.date.as_deref()) {
        Ok(date) => state.scheduler.history(date, query.probe_id.as_deref()),
        Err(_) => Vec::new(),
    };

    Json(HistoryResponse {
        date: display_date(query.date.as_deref()),
        probe_id: query.probe_id,
        history,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub date: String,
    pub summary: HistorySummary,
}

pub async fn handle_history_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> impl IntoResponse {
    let summary = match parse_date(query.date.as_deref()) {
        Ok(date) => state.scheduler.summary(date),
        Err(_) => HistorySummary::default(),
    };

    Json(SummaryResponse {
        date: display_date(query.date.as_deref()),
        summary,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct ProbeHistoryQuery {
    pub days: Option<u32>,
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProbeInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub probe_type: ProbeType,
    pub target: String,
}

impl From<&Probe> for ProbeInfo {
    fn from(probe: &Probe) -> Self {
        Self {
            id: probe.id.clone(),
            name: probe.name.clone(),
            probe_type: probe.probe_type(),
            target: probe.target.clone(),
        }
    }
}

/// Latest result, or `{"status": "unknown"}` before the first check.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CurrentStatusView {
    Known(CheckResult),
    Unknown { status: &'static str },
}

impl From<Option<CheckResult>> for CurrentStatusView {
    fn from(result: Option<CheckResult>) -> Self {
        match result {
            Some(result) => Self::Known(result),
            None => Self::Unknown {
                status: crate::history::UNKNOWN_STATUS,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProbeHistoryResponse {
    pub probe: ProbeInfo,
    pub period: String,
    pub current_status: CurrentStatusView,
    pub statistics: HistoryStatistics,
    pub history: Vec<HistoryEntry>,
}

pub async fn handle_probe_history(
    State(state): State<AppState>,
    Path(probe_id): Path<String>,
    Query(query): Query<ProbeHistoryQuery>,
) -> Response {
    let scheduler = &state.scheduler;
    let Some(probe) = scheduler.find_probe(&probe_id).await else {
        return probe_not_found();
    };

    let (period, history) = match query.date.as_deref() {
        Some(raw) => {
            let history = match parse_date(Some(raw)) {
                Ok(date) => scheduler.history(date, Some(&probe.id)),
                Err(_) => Vec::new(),
            };
            (raw.to_string(), history)
        }
        None => {
            let days = query.days.unwrap_or(DEFAULT_HISTORY_DAYS);
            (format!("last {} days", days), scheduler.probe_history(&probe.id, days))
        }
    };

    Json(ProbeHistoryResponse {
        probe: ProbeInfo::from(&probe),
        period,
        current_status: scheduler.probe_status(&probe.id).await.into(),
        statistics: HistoryStatistics::from_entries(&history),
        history,
    })
    .into_response()
}

// ============================================================================
// Probes and operator actions
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ProbesResponse {
    pub probes: Vec<Probe>,
}

pub async fn handle_probes(State(state): State<AppState>) -> impl IntoResponse {
    let probes = state.scheduler.probes().await;
    Json(ProbesResponse {
        probes: probes.as_ref().clone(),
    })
}

pub async fn handle_check(State(state): State<AppState>, Path(probe_id): Path<String>) -> Response {
    match state.scheduler.check_now(&probe_id).await {
        Ok(result) => Json(result).into_response(),
        Err(SchedulerError::UnknownProbe(_)) => probe_not_found(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub message: String,
    pub probes_count: usize,
}

pub async fn handle_reload(State(state): State<AppState>) -> Response {
    match state.scheduler.reload().await {
        Ok(count) => Json(ReloadResponse {
            message: "configuration reloaded".to_string(),
            probes_count: count,
        })
        .into_response(),
        Err(e) => {
            tracing::error!("Reload failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
