use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::lock::LockLease;
use crate::domain::monitoring::{Alert, ExecutionMetric, Severity};
use crate::domain::order::{LineItem, OrderRecord, OrderStatus};
use crate::domain::reconciliation::AuditEntry;
use crate::domain::ticket::{NewTicket, TicketRecord, TicketStatus};
use crate::schema::{
    order_line_items, orders, reconciliation_alerts, reconciliation_audit, reconciliation_locks,
    reconciliation_metrics, tickets,
};

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderRow {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub status: String,
    pub status_reason: Option<String>,
    pub total_amount: BigDecimal,
    pub customer_email: Option<String>,
    pub gateway_charge_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for OrderRecord {
    type Error = DomainError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(OrderRecord {
            id: row.id,
            customer_id: row.customer_id,
            status: OrderStatus::from_str(&row.status)?,
            status_reason: row.status_reason,
            total_amount: row.total_amount,
            customer_email: row.customer_email,
            gateway_charge_id: row.gateway_charge_id,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = order_line_items)]
#[diesel(belongs_to(OrderRow, foreign_key = order_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LineItemRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub ticket_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub name: String,
    pub item_type: Option<String>,
    pub event_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub total_price: BigDecimal,
    pub created_at: DateTime<Utc>,
}

impl From<LineItemRow> for LineItem {
    fn from(row: LineItemRow) -> Self {
        LineItem {
            id: row.id,
            order_id: row.order_id,
            ticket_id: row.ticket_id,
            product_id: row.product_id,
            name: row.name,
            item_type: row.item_type,
            event_id: row.event_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            total_price: row.total_price,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = tickets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TicketRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub order_id: Option<Uuid>,
    pub line_item_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub seat_number: Option<i32>,
    pub status: String,
    pub qr_payload: String,
    pub price: BigDecimal,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for TicketRecord {
    type Error = DomainError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(TicketRecord {
            id: row.id,
            event_id: row.event_id,
            order_id: row.order_id,
            line_item_id: row.line_item_id,
            user_id: row.user_id,
            customer_name: row.customer_name,
            customer_email: row.customer_email,
            seat_number: row.seat_number,
            status: TicketStatus::from_str(&row.status)?,
            qr_payload: row.qr_payload,
            price: row.price,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicketRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub order_id: Option<Uuid>,
    pub line_item_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub seat_number: Option<i32>,
    pub status: String,
    pub qr_payload: String,
    pub price: BigDecimal,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

impl From<&NewTicket> for NewTicketRow {
    fn from(t: &NewTicket) -> Self {
        NewTicketRow {
            id: t.id,
            event_id: t.event_id,
            order_id: Some(t.order_id),
            line_item_id: Some(t.line_item_id),
            user_id: t.user_id,
            customer_name: t.customer_name.clone(),
            customer_email: t.customer_email.clone(),
            seat_number: Some(t.seat_number),
            status: TicketStatus::Active.as_str().to_string(),
            qr_payload: t.qr_payload.clone(),
            price: t.price.clone(),
            quantity: 1,
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = reconciliation_audit)]
pub struct NewAuditRow {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub correction_type: String,
    pub old_values: Value,
    pub new_values: Value,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl From<&AuditEntry> for NewAuditRow {
    fn from(a: &AuditEntry) -> Self {
        NewAuditRow {
            id: a.id,
            execution_id: a.execution_id,
            entity_type: a.entity_type.as_str().to_string(),
            entity_id: a.entity_id,
            correction_type: a.correction_type.as_str().to_string(),
            old_values: a.old_values.clone(),
            new_values: a.new_values.clone(),
            metadata: a.metadata.clone(),
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = reconciliation_audit)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AuditRow {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub correction_type: String,
    pub old_values: Value,
    pub new_values: Value,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = reconciliation_locks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LockRow {
    pub id: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<LockRow> for LockLease {
    fn from(row: LockRow) -> Self {
        LockLease {
            holder: row.holder,
            acquired_at: row.acquired_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = reconciliation_metrics)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MetricRow {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub lock_wait_ms: i64,
    pub processed_count: i32,
    pub corrected_count: i32,
    pub error_count: i32,
    pub api_success_rate: f64,
    pub failed: bool,
}

impl From<&ExecutionMetric> for MetricRow {
    fn from(m: &ExecutionMetric) -> Self {
        MetricRow {
            id: m.id,
            execution_id: m.execution_id,
            started_at: m.started_at,
            duration_ms: m.duration_ms,
            lock_wait_ms: m.lock_wait_ms,
            processed_count: m.processed_count,
            corrected_count: m.corrected_count,
            error_count: m.error_count,
            api_success_rate: m.api_success_rate,
            failed: m.failed,
        }
    }
}

impl From<MetricRow> for ExecutionMetric {
    fn from(row: MetricRow) -> Self {
        ExecutionMetric {
            id: row.id,
            execution_id: row.execution_id,
            started_at: row.started_at,
            duration_ms: row.duration_ms,
            lock_wait_ms: row.lock_wait_ms,
            processed_count: row.processed_count,
            corrected_count: row.corrected_count,
            error_count: row.error_count,
            api_success_rate: row.api_success_rate,
            failed: row.failed,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = reconciliation_alerts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AlertRow {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub rule: String,
    pub severity: String,
    pub description: String,
    pub metric_name: String,
    pub metric_value: f64,
    pub threshold: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&Alert> for AlertRow {
    fn from(a: &Alert) -> Self {
        AlertRow {
            id: a.id,
            execution_id: a.execution_id,
            rule: a.rule.clone(),
            severity: a.severity.as_str().to_string(),
            description: a.description.clone(),
            metric_name: a.metric_name.clone(),
            metric_value: a.metric_value,
            threshold: a.threshold,
            created_at: a.created_at,
        }
    }
}

impl TryFrom<AlertRow> for Alert {
    type Error = DomainError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(Alert {
            id: row.id,
            execution_id: row.execution_id,
            rule: row.rule,
            severity: Severity::from_str(&row.severity)?,
            description: row.description,
            metric_name: row.metric_name,
            metric_value: row.metric_value,
            threshold: row.threshold,
            created_at: row.created_at,
        })
    }
}
