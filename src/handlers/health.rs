use actix_web::{web, HttpResponse};

use crate::domain::monitoring::HealthStatus;
use crate::errors::AppError;

use super::AppState;

/// GET /health
///
/// Store connectivity, recency of the last pass and recent alerts. Answers
/// 503 when the overall status is critical.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Healthy or warning", body = crate::domain::monitoring::HealthReport),
        (status = 503, description = "Critical", body = crate::domain::monitoring::HealthReport),
    ),
    tag = "health"
)]
pub async fn get_health(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let report = web::block(move || state.reconciliation.monitoring().health_check())
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let response = if report.status == HealthStatus::Critical {
        HttpResponse::ServiceUnavailable().json(report)
    } else {
        HttpResponse::Ok().json(report)
    };
    Ok(response)
}
