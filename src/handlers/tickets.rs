use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::application::issuance_service::{IssuanceDisposition, IssuanceOutcome};
use crate::domain::order::CustomerData;
use crate::domain::ticket::TicketRecord;
use crate::errors::AppError;

use super::AppState;

// ── Request / response DTOs ──────────────────────────────────────────────────

/// Customer identity to print on the tickets. Quantities and prices always
/// come from the stored order, never from this body.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct IssueTicketsRequest {
    pub user_id: Option<Uuid>,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TicketResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub order_id: Option<Uuid>,
    pub line_item_id: Option<Uuid>,
    pub seat_number: Option<i32>,
    pub status: String,
    pub qr_payload: String,
    /// Decimal price as a string, e.g. "50.00"
    pub price: String,
    pub created_at: String,
}

impl From<TicketRecord> for TicketResponse {
    fn from(t: TicketRecord) -> Self {
        TicketResponse {
            id: t.id,
            event_id: t.event_id,
            order_id: t.order_id,
            line_item_id: t.line_item_id,
            seat_number: t.seat_number,
            status: t.status.as_str().to_string(),
            qr_payload: t.qr_payload,
            price: t.price.to_string(),
            created_at: t.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IssueTicketsResponse {
    pub order_id: Uuid,
    /// One of `issued`, `already_issued`, `no_ticket_items`
    pub disposition: String,
    pub tickets: Vec<TicketResponse>,
}

impl From<IssuanceOutcome> for IssueTicketsResponse {
    fn from(outcome: IssuanceOutcome) -> Self {
        let disposition = match outcome.disposition {
            IssuanceDisposition::Issued => "issued",
            IssuanceDisposition::AlreadyIssued => "already_issued",
            IssuanceDisposition::NoTicketItems => "no_ticket_items",
        };
        IssueTicketsResponse {
            order_id: outcome.order_id,
            disposition: disposition.to_string(),
            tickets: outcome.tickets.into_iter().map(TicketResponse::from).collect(),
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /orders/{id}/tickets
///
/// Issues one ticket per purchased unit of a paid order. Seats, tickets and
/// audit rows commit together; repeating the call returns the same tickets.
#[utoipa::path(
    post,
    path = "/orders/{id}/tickets",
    params(
        ("id" = Uuid, Path, description = "Order UUID"),
    ),
    request_body = IssueTicketsRequest,
    responses(
        (status = 201, description = "Tickets issued", body = IssueTicketsResponse),
        (status = 200, description = "Tickets already issued, or no ticket items", body = IssueTicketsResponse),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Sold out (order marked refund_required) or order not paid"),
        (status = 422, description = "Order line items cannot be ticketed"),
        (status = 503, description = "Store unavailable, retry later"),
    ),
    tag = "tickets"
)]
pub async fn issue_tickets(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: Option<web::Json<IssueTicketsRequest>>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let body = body.map(web::Json::into_inner).unwrap_or_default();
    let customer = CustomerData {
        user_id: body.user_id,
        name: body.name,
        email: body.email,
    };

    let outcome = web::block(move || state.issuance.issue_for_order(order_id, &customer))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    let response = match outcome.disposition {
        IssuanceDisposition::Issued => HttpResponse::Created(),
        _ => HttpResponse::Ok(),
    }
    .json(IssueTicketsResponse::from(outcome));
    Ok(response)
}

/// GET /orders/{id}/tickets
#[utoipa::path(
    get,
    path = "/orders/{id}/tickets",
    params(
        ("id" = Uuid, Path, description = "Order UUID"),
    ),
    responses(
        (status = 200, description = "Tickets of the order, by seat", body = [TicketResponse]),
        (status = 503, description = "Store unavailable, retry later"),
    ),
    tag = "tickets"
)]
pub async fn list_tickets(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();

    let tickets = web::block(move || state.issuance.tickets_for_order(order_id))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(
        tickets
            .into_iter()
            .map(TicketResponse::from)
            .collect::<Vec<_>>(),
    ))
}
