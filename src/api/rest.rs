// =============================================================================
// REST API façade — Axum 0.7
// =============================================================================
//
// Narrow read/command surface for the chat bot and web UI. Writes return the
// new authoritative state; decision/execution errors surface to the caller
// as structured JSON, while enrichment/ingestion failures stay in the logs.
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
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::app_state::AppState;
use crate::error::MeridianError;
use crate::kb::{KbEntryDraft, KbFilter};
use crate::types::{EventType, Importance, Region};

type ApiError = (StatusCode, Json<serde_json::Value>);

fn internal_error(e: MeridianError) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": msg.into() })),
    )
}

/// Build the router with permissive CORS and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/portfolio", get(portfolio))
        .route("/api/quotes/:ticker", get(quotes))
        .route("/api/analyze", post(analyze))
        .route("/api/execute", post(execute))
        .route("/api/news", post(add_news))
        .route("/api/events", get(events))
        .route("/api/trades", get(trades))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "session": state.session.phase().to_string(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

// =============================================================================
// Portfolio
// =============================================================================

async fn portfolio(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.executor.portfolio().await.map_err(internal_error)?;
    Ok(Json(view))
}

// =============================================================================
// Quotes
// =============================================================================

#[derive(Deserialize)]
struct QuotesParams {
    #[serde(default = "default_days")]
    days: i64,
}

fn default_days() -> i64 {
    30
}

async fn quotes(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
    Query(params): Query<QuotesParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.days <= 0 || params.days > 3650 {
        return Err(bad_request("days must be in 1..=3650"));
    }
    let bars = state
        .quotes
        .recent_bars(&ticker, params.days, state.clock.today())
        .await
        .map_err(internal_error)?;
    Ok(Json(bars))
}

// =============================================================================
// Analyze
// =============================================================================

#[derive(Deserialize)]
struct AnalyzeRequest {
    ticker: String,
    #[serde(default)]
    use_llm: bool,
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.ticker.trim().is_empty() {
        return Err(bad_request("ticker is required"));
    }
    let use_llm = req.use_llm && state.settings.use_llm();
    let report = state
        .analyst
        .analyze(req.ticker.trim(), use_llm)
        .await
        .map_err(internal_error)?;
    Ok(Json(report))
}

// =============================================================================
// Execute
// =============================================================================

#[derive(Deserialize)]
struct ExecuteRequest {
    tickers: Vec<String>,
}

async fn execute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.tickers.is_empty() {
        return Err(bad_request("tickers must be non-empty"));
    }
    info!(tickers = ?req.tickers, "execute requested via API");
    let records = state
        .run_trading_cycle(&req.tickers, state.settings.use_llm(), false)
        .await;
    Ok(Json(records))
}

// =============================================================================
// Manual news
// =============================================================================

#[derive(Deserialize)]
struct NewsRequest {
    ticker: String,
    source: String,
    content: String,
    #[serde(default)]
    sentiment_score: Option<f64>,
}

async fn add_news(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.ticker.trim().is_empty() || req.content.trim().is_empty() {
        return Err(bad_request("ticker and content are required"));
    }
    if let Some(score) = req.sentiment_score {
        if !(0.0..=1.0).contains(&score) {
            return Err(bad_request("sentiment_score must be in [0,1]"));
        }
    }

    let draft = KbEntryDraft {
        ts: state.clock.now().naive_utc(),
        ticker: req.ticker.trim().to_uppercase(),
        source: if req.source.trim().is_empty() {
            "manual".into()
        } else {
            req.source.trim().to_string()
        },
        content: req.content.trim().to_string(),
        event_type: EventType::Manual,
        importance: Importance::Medium,
        region: Region::Usa,
        link: None,
        sentiment_score: req.sentiment_score,
    };

    let (id, inserted) = state.kb.insert(&draft).await.map_err(internal_error)?;
    let entry = state.kb.get(id).await.map_err(internal_error)?;
    Ok(Json(serde_json::json!({ "id": id, "inserted": inserted, "entry": entry })))
}

// =============================================================================
// Event search
// =============================================================================

#[derive(Deserialize)]
struct EventsParams {
    #[serde(default)]
    ticker: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default = "default_event_days")]
    days: i64,
    /// Substring match on content.
    #[serde(default)]
    q: Option<String>,
    #[serde(default = "default_events_limit")]
    limit: i64,
}

fn default_event_days() -> i64 {
    7
}

fn default_events_limit() -> i64 {
    50
}

async fn events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.limit <= 0 || params.limit > 500 {
        return Err(bad_request("limit must be in 1..=500"));
    }
    let now = state.clock.now().naive_utc();
    let filter = KbFilter {
        ticker: params.ticker.map(|t| t.trim().to_uppercase()),
        include_macro: true,
        since: Some(now - chrono::Duration::days(params.days.max(1))),
        until: Some(now),
        event_type: params.event_type.as_deref().map(EventType::parse),
        content_like: params.q,
        limit: params.limit,
    };
    let entries = state.kb.query(&filter).await.map_err(internal_error)?;
    Ok(Json(entries))
}

// =============================================================================
// Trades
// =============================================================================

#[derive(Deserialize)]
struct TradesParams {
    #[serde(default = "default_trades_limit")]
    limit: i64,
    #[serde(default)]
    ticker: Option<String>,
}

fn default_trades_limit() -> i64 {
    50
}

async fn trades(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TradesParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.limit <= 0 || params.limit > 1000 {
        return Err(bad_request("limit must be in 1..=1000"));
    }
    let rows = state
        .executor
        .trades(params.limit, params.ticker.as_deref())
        .await
        .map_err(internal_error)?;
    Ok(Json(rows))
}
