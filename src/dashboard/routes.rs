//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::engine::aggregator::StatusSnapshot;
use crate::engine::session::{DashboardOverview, DashboardSession, RECENT_ALERTS_LIMIT};
use crate::types::{AlertDetail, GuardError, Settings, WalletInfo};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub session: Arc<DashboardSession>,
}

impl DashboardState {
    pub fn new(session: Arc<DashboardSession>) -> Self {
        Self { session }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub records: Vec<WalletInfo>,
    pub can_refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps engine errors onto HTTP statuses.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<GuardError>() {
            Some(GuardError::RefreshCoolingDown) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %format!("{:#}", self.0), "Dashboard request failed");
        }
        let body = ErrorBody {
            error: format!("{:#}", self.0),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/wallets
pub async fn get_wallets(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.session.aggregator().snapshot())
}

/// POST /api/wallets/refresh
pub async fn refresh_wallets(
    State(state): State<AppState>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let aggregator = state.session.aggregator();
    let records = aggregator.refresh().await?;
    Ok(Json(RefreshResponse {
        records,
        can_refresh: aggregator.can_refresh(),
    }))
}

/// GET /api/alerts?limit=N
pub async fn get_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Vec<AlertDetail>>, ApiError> {
    let limit = query.limit.unwrap_or(RECENT_ALERTS_LIMIT);
    let alerts = state.session.alerts().recent_alerts(limit).await?;
    Ok(Json(alerts))
}

/// POST /api/dashboard/activate
pub async fn activate(State(state): State<AppState>) -> Result<Json<DashboardOverview>, ApiError> {
    Ok(Json(state.session.activate().await?))
}

/// GET /api/settings
pub async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.session.settings().await)
}

/// POST /api/settings/notifications/toggle
pub async fn toggle_notifications(
    State(state): State<AppState>,
) -> Result<Json<Settings>, ApiError> {
    Ok(Json(state.session.toggle_notifications().await?))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
