use actix_web::{web, HttpResponse};
use chrono::Duration;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::errors::AppError;

use super::AppState;

const MAX_WINDOW_HOURS: i64 = 24 * 30;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WindowParams {
    /// Look-back window in hours. Defaults to 24, maximum 720.
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    24
}

impl WindowParams {
    fn clamped(&self) -> i64 {
        self.hours.clamp(1, MAX_WINDOW_HOURS)
    }
}

/// POST /reconciliation/run
///
/// Runs one reconciliation pass now. If another pass holds the execution
/// lock the response is a report with `status: skipped`.
#[utoipa::path(
    post,
    path = "/reconciliation/run",
    responses(
        (status = 200, description = "Pass report (completed or skipped)"),
        (status = 503, description = "Lock store unavailable"),
    ),
    tag = "reconciliation"
)]
pub async fn run_pass(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let report = web::block(move || state.reconciliation.run_reconciliation_pass())
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(report))
}

/// GET /reconciliation/scan
///
/// Reports what a pass over the window would find without correcting
/// anything.
#[utoipa::path(
    get,
    path = "/reconciliation/scan",
    params(WindowParams),
    responses(
        (status = 200, description = "Orphan tickets, orphan orders and price inconsistencies"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "reconciliation"
)]
pub async fn scan(
    state: web::Data<AppState>,
    query: web::Query<WindowParams>,
) -> Result<HttpResponse, AppError> {
    let lookback = Duration::hours(query.clamped());

    let result = web::block(move || state.reconciliation.scan_window(lookback))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(result))
}

/// GET /reconciliation/stats
#[utoipa::path(
    get,
    path = "/reconciliation/stats",
    params(WindowParams),
    responses(
        (status = 200, description = "Aggregated run statistics", body = crate::domain::monitoring::ExecutionStats),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "reconciliation"
)]
pub async fn get_stats(
    state: web::Data<AppState>,
    query: web::Query<WindowParams>,
) -> Result<HttpResponse, AppError> {
    let hours = query.clamped();

    let stats = web::block(move || state.reconciliation.monitoring().get_execution_stats(hours))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(stats))
}

/// GET /reconciliation/alerts
///
/// Alerts raised in the window, newest first.
#[utoipa::path(
    get,
    path = "/reconciliation/alerts",
    params(WindowParams),
    responses(
        (status = 200, description = "Recent alerts", body = [crate::domain::monitoring::Alert]),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "reconciliation"
)]
pub async fn get_alerts(
    state: web::Data<AppState>,
    query: web::Query<WindowParams>,
) -> Result<HttpResponse, AppError> {
    let hours = query.clamped();

    let alerts = web::block(move || state.reconciliation.monitoring().recent_alerts(hours))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(alerts))
}
