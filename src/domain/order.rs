use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    RefundRequired,
    Refunded,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::RefundRequired => "refund_required",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "refund_required" => Ok(OrderStatus::RefundRequired),
            "refunded" => Ok(OrderStatus::Refunded),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::InvalidInput(format!(
                "unknown order status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub status_reason: Option<String>,
    pub total_amount: BigDecimal,
    pub customer_email: Option<String>,
    pub gateway_charge_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One priced line of an order. `total_price` should equal
/// `unit_price * quantity`; reconciliation repairs rows where it doesn't.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
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

impl LineItem {
    pub fn expected_total(&self) -> BigDecimal {
        money(&self.unit_price * BigDecimal::from(self.quantity))
    }
}

/// Customer identity attached to issued tickets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerData {
    pub user_id: Option<Uuid>,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// A pending order together with its line items, as scanned by reconciliation.
#[derive(Debug, Clone)]
pub struct OrderBatch {
    pub order: OrderRecord,
    pub items: Vec<LineItem>,
}

/// Round to currency precision.
pub fn money(value: BigDecimal) -> BigDecimal {
    value.round(2)
}

/// True when `a` and `b` differ by more than `epsilon`.
pub fn differs(a: &BigDecimal, b: &BigDecimal, epsilon: &BigDecimal) -> bool {
    (a - b).abs() > *epsilon
}
