use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;
use super::order::LineItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Active,
    Used,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Active => "active",
            TicketStatus::Used => "used",
            TicketStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TicketStatus::Active),
            "used" => Ok(TicketStatus::Used),
            "cancelled" => Ok(TicketStatus::Cancelled),
            other => Err(DomainError::InvalidInput(format!(
                "unknown ticket status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketRecord {
    pub id: Uuid,
    pub event_id: Uuid,
    pub order_id: Option<Uuid>,
    pub line_item_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub seat_number: Option<i32>,
    pub status: TicketStatus,
    pub qr_payload: String,
    pub price: BigDecimal,
    pub created_at: DateTime<Utc>,
}

/// A fully prepared ticket row, ready to be inserted as part of an issuance
/// batch. Quantity is always one.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub order_id: Uuid,
    pub line_item_id: Uuid,
    pub user_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub seat_number: i32,
    pub qr_payload: String,
    pub price: BigDecimal,
    pub created_at: DateTime<Utc>,
}

impl NewTicket {
    pub fn into_record(self) -> TicketRecord {
        TicketRecord {
            id: self.id,
            event_id: self.event_id,
            order_id: Some(self.order_id),
            line_item_id: Some(self.line_item_id),
            user_id: self.user_id,
            customer_name: self.customer_name,
            customer_email: self.customer_email,
            seat_number: Some(self.seat_number),
            status: TicketStatus::Active,
            qr_payload: self.qr_payload,
            price: self.price,
            created_at: self.created_at,
        }
    }
}

// ── Classification ───────────────────────────────────────────────────────────

/// Which rule decided that a line item is (or is not) a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationRule {
    TypeTag,
    EventReference,
    NamePattern,
}

impl ClassificationRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationRule::TypeTag => "type_tag",
            ClassificationRule::EventReference => "event_reference",
            ClassificationRule::NamePattern => "name_pattern",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Ticket {
        rule: ClassificationRule,
        event_id: Uuid,
    },
    NotTicket {
        rule: Option<ClassificationRule>,
    },
    /// Looks like a ticket but no event can be attributed to it.
    Unresolved {
        rule: ClassificationRule,
    },
}

const TICKET_TYPE_TAGS: &[&str] = &["ticket", "ingresso"];

/// Ordered, deterministic "is this a ticket?" rules: explicit type tag, then
/// explicit event reference, then a catalog name pattern as a last resort.
#[derive(Debug, Clone)]
pub struct TicketClassifier {
    name_patterns: Vec<String>,
    default_event_id: Option<Uuid>,
}

impl TicketClassifier {
    pub fn new(name_patterns: Vec<String>, default_event_id: Option<Uuid>) -> Self {
        Self {
            name_patterns: name_patterns
                .into_iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            default_event_id,
        }
    }

    pub fn classify(&self, item: &LineItem) -> Classification {
        if let Some(tag) = item.item_type.as_deref() {
            let tag = tag.trim().to_lowercase();
            if TICKET_TYPE_TAGS.contains(&tag.as_str()) {
                return match item.event_id.or(self.default_event_id) {
                    Some(event_id) => Classification::Ticket {
                        rule: ClassificationRule::TypeTag,
                        event_id,
                    },
                    None => Classification::Unresolved {
                        rule: ClassificationRule::TypeTag,
                    },
                };
            }
            if !tag.is_empty() {
                return Classification::NotTicket {
                    rule: Some(ClassificationRule::TypeTag),
                };
            }
        }

        if let Some(event_id) = item.event_id {
            return Classification::Ticket {
                rule: ClassificationRule::EventReference,
                event_id,
            };
        }

        let name = item.name.to_lowercase();
        if self.name_patterns.iter().any(|p| name.contains(p.as_str())) {
            return match self.default_event_id {
                Some(event_id) => Classification::Ticket {
                    rule: ClassificationRule::NamePattern,
                    event_id,
                },
                None => Classification::Unresolved {
                    rule: ClassificationRule::NamePattern,
                },
            };
        }

        Classification::NotTicket { rule: None }
    }
}

// ── Expansion ────────────────────────────────────────────────────────────────

/// One unit of admission to be issued: a batch line of quantity N yields N.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitTicket {
    pub line_item_id: Uuid,
    pub event_id: Uuid,
    pub price: BigDecimal,
    pub rule: ClassificationRule,
}

pub fn expand_units(
    item: &LineItem,
    event_id: Uuid,
    rule: ClassificationRule,
) -> impl Iterator<Item = UnitTicket> + '_ {
    (0..item.quantity.max(0)).map(move |_| UnitTicket {
        line_item_id: item.id,
        event_id,
        price: item.unit_price.clone(),
        rule,
    })
}
