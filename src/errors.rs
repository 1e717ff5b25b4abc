use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use thiserror::Error;

use crate::application::issuance_service::IssuanceError;
use crate::domain::credential::CredentialError;
use crate::domain::errors::DomainError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Sold out: {0}")]
    SoldOut(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DomainError> for AppError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::NotFound(msg) => AppError::NotFound(msg),
            DomainError::InvalidInput(msg) => AppError::Unprocessable(msg),
            DomainError::Conflict(msg) => AppError::Conflict(msg),
            e @ DomainError::CapacityExhausted { .. } => AppError::SoldOut(e.to_string()),
            DomainError::Store(msg) => AppError::Unavailable(msg),
        }
    }
}

impl From<IssuanceError> for AppError {
    fn from(e: IssuanceError) -> Self {
        match e {
            IssuanceError::CapacityExhausted { .. } => AppError::SoldOut(e.to_string()),
            IssuanceError::OrderNotFound(_) => AppError::NotFound(e.to_string()),
            IssuanceError::OrderNotPaid { .. } => AppError::Conflict(e.to_string()),
            IssuanceError::ForeignLineItem { .. } | IssuanceError::UnresolvedEvent(_) => {
                AppError::Unprocessable(e.to_string())
            }
            IssuanceError::Store(inner) => inner.into(),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(e: CredentialError) -> Self {
        AppError::Unprocessable(e.to_string())
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::SoldOut(_) | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl actix_web::ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::Unavailable(_) => "Store unavailable, retry later".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status()).json(serde_json::json!({ "error": message }))
    }
}
