use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::credential::decode_and_validate;
use crate::errors::AppError;

use super::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateCredentialRequest {
    /// The scanned QR payload
    pub payload: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ValidateCredentialResponse {
    pub valid: bool,
    pub ticket_id: Uuid,
    pub event_id: Uuid,
    pub issued_at: String,
}

/// POST /credentials/validate
///
/// Decodes a QR payload and checks its checksum, version and age. Does not
/// look the ticket up; the caller decides what a valid credential admits.
#[utoipa::path(
    post,
    path = "/credentials/validate",
    request_body = ValidateCredentialRequest,
    responses(
        (status = 200, description = "Credential is well formed and intact", body = ValidateCredentialResponse),
        (status = 422, description = "Malformed, tampered, expired or unsupported credential"),
    ),
    tag = "credentials"
)]
pub async fn validate_credential(
    state: web::Data<AppState>,
    body: web::Json<ValidateCredentialRequest>,
) -> Result<HttpResponse, AppError> {
    let credential = decode_and_validate(&body.payload, Utc::now(), state.credential_max_age)?;

    Ok(HttpResponse::Ok().json(ValidateCredentialResponse {
        valid: true,
        ticket_id: credential.ticket_id,
        event_id: credential.event_id,
        issued_at: credential.issued_at.to_rfc3339(),
    }))
}
