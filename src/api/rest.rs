// =============================================================================
// REST API Endpoints — Axum
// =============================================================================
//
// Read-only views over the signal store plus two control actions (forced
// rescan, alert mark-read). Handlers never touch the scanner directly; they
// read the store and poke the rescan Notify.
//
// Error mapping: store misses become 404, bad filter tokens 400, anything
// unexpected 500 with a correlation id in both the log line and the body.
//
// CORS is configured permissively for development; tighten the allowed
// origins in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::{error, info};

use crate::app_state::AppState;
use crate::signal_store::{SignalDirection, SignalFilter};

/// Build the full router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    use tower_http::catch_panic::CatchPanicLayer;
    use tower_http::cors::{Any, CorsLayer};

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Any handler panic becomes a 500 carrying a correlation id that also
    // lands in the log, instead of tearing down the connection.
    let catch_panic = CatchPanicLayer::custom(|_: Box<dyn std::any::Any + Send>| {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        error!(correlation_id = %correlation_id, "handler panicked");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "error": "internal error",
                "correlation_id": correlation_id,
            })),
        )
            .into_response()
    });

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/signals", get(signals))
        // Static segment before the catch-all so "search" never parses as a
        // symbol.
        .route("/api/v1/signals/search", get(search))
        .route("/api/v1/signals/:symbol", get(signal_by_symbol))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/rescan", post(rescan))
        .route("/api/v1/alerts", get(alerts))
        .route("/api/v1/alerts/:id/read", post(mark_alert_read))
        .route("/api/v1/alerts/stream", get(crate::api::ws::alert_stream))
        .layer(catch_panic)
        .layer(cors)
        .with_state(state)
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message.into() })),
    )
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "state_version": state.current_state_version(),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "server_time": chrono::Utc::now().to_rfc3339(),
    }))
}

// =============================================================================
// Signals
// =============================================================================

#[derive(Debug, Deserialize)]
struct SignalsQuery {
    /// Accepts both snake_case and the dashboard's camelCase token.
    #[serde(default, alias = "minMatches")]
    min_matches: Option<usize>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    proximity: Option<f64>,
}

async fn signals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SignalsQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let direction = match &query.direction {
        Some(token) => Some(SignalDirection::from_token(token).ok_or_else(|| {
            bad_request(format!(
                "invalid direction '{token}', expected 'upper' or 'lower'"
            ))
        })?),
        None => None,
    };

    if let Some(p) = query.proximity {
        if !p.is_finite() || p < 0.0 {
            return Err(bad_request(format!("invalid proximity '{p}'")));
        }
    }

    let filter = SignalFilter {
        min_matches: query.min_matches,
        direction,
        max_proximity_pct: query.proximity,
        structure: None,
    };

    Ok(Json(state.store.query(&filter)))
}

async fn signal_by_symbol(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let symbol = symbol.to_uppercase();
    match state.store.get(&symbol) {
        Some(signal) => Ok(Json(signal)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("no signal for '{symbol}'") })),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> impl IntoResponse {
    Json(state.store.search(&query.q))
}

// =============================================================================
// Stats
// =============================================================================

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_stats = state.store.stats();
    let status = state.scan_status.read().clone();

    Json(serde_json::json!({
        "total": store_stats.total,
        "upper": store_stats.upper,
        "lower": store_stats.lower,
        "favorites": store_stats.favorites,
        "scans_completed": status.scans_completed,
        "last_scan_time": status.last_scan_time.map(|t| t.to_rfc3339()),
        "next_scan_in_seconds": state.next_scan_in_seconds(),
    }))
}

// =============================================================================
// Rescan
// =============================================================================

async fn rescan(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("rescan requested via API");
    state.request_rescan();
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "rescan scheduled" })),
    )
}

// =============================================================================
// Alerts
// =============================================================================

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    #[serde(default = "default_alert_limit")]
    limit: usize,
}

fn default_alert_limit() -> usize {
    50
}

async fn alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> impl IntoResponse {
    Json(state.bus.recent(query.limit))
}

async fn mark_alert_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    if state.bus.mark_read(&id) {
        state.increment_version();
        Ok(Json(serde_json::json!({ "status": "ok" })))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown alert id '{id}'") })),
        ))
    }
}
