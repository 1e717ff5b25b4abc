use std::collections::{BTreeMap, HashMap};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::order::{differs, money, LineItem, OrderBatch};
use super::ticket::{Classification, TicketClassifier, TicketRecord};

// ── Audit ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Order,
    OrderLineItem,
    Ticket,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Order => "order",
            EntityType::OrderLineItem => "order_line_item",
            EntityType::Ticket => "ticket",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionType {
    TicketIssued,
    OrderStatusChanged,
    OrphanTicketLinked,
    PriceMismatch,
    TotalMismatch,
    IntraOrderInconsistency,
    OrderTotalMismatch,
}

impl CorrectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionType::TicketIssued => "ticket_issued",
            CorrectionType::OrderStatusChanged => "order_status_changed",
            CorrectionType::OrphanTicketLinked => "orphan_ticket_linked",
            CorrectionType::PriceMismatch => "price_mismatch",
            CorrectionType::TotalMismatch => "total_mismatch",
            CorrectionType::IntraOrderInconsistency => "intra_order_inconsistency",
            CorrectionType::OrderTotalMismatch => "order_total_mismatch",
        }
    }
}

/// Immutable before/after record of one automated change.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub correction_type: CorrectionType,
    pub old_values: Value,
    pub new_values: Value,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        execution_id: Uuid,
        entity_type: EntityType,
        entity_id: Uuid,
        correction_type: CorrectionType,
        old_values: Value,
        new_values: Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            entity_type,
            entity_id,
            correction_type,
            old_values,
            new_values,
            metadata: json!({}),
            created_at,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

// ── Orphan ticket matching ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub line_item_id: Uuid,
    pub order_id: Uuid,
    pub delta: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    NoMatch,
    Exact(Candidate),
    /// Several candidates, one strictly closest in time. Heuristic.
    Closest {
        chosen: Candidate,
        candidates: usize,
    },
    /// Several candidates tied for closest; never auto-resolved.
    Ambiguous(Vec<Candidate>),
}

/// Rank line items that reference `ticket` by how close their creation time
/// is to the ticket's. Items outside `±tolerance` are discarded.
pub fn match_orphan_ticket(
    ticket: &TicketRecord,
    referencing_items: &[LineItem],
    tolerance: Duration,
) -> MatchOutcome {
    let mut candidates: Vec<Candidate> = referencing_items
        .iter()
        .filter(|item| item.ticket_id == Some(ticket.id))
        .map(|item| Candidate {
            line_item_id: item.id,
            order_id: item.order_id,
            delta: (item.created_at - ticket.created_at).abs(),
        })
        .filter(|c| c.delta <= tolerance)
        .collect();

    // Several line items of the same order are one candidate order.
    candidates.sort_by_key(|c| c.delta);
    let mut seen_orders = Vec::new();
    candidates.retain(|c| {
        if seen_orders.contains(&c.order_id) {
            false
        } else {
            seen_orders.push(c.order_id);
            true
        }
    });

    match candidates.len() {
        0 => MatchOutcome::NoMatch,
        1 => MatchOutcome::Exact(candidates.remove(0)),
        n => {
            if candidates[0].delta == candidates[1].delta {
                let best = candidates[0].delta;
                candidates.retain(|c| c.delta == best);
                MatchOutcome::Ambiguous(candidates)
            } else {
                MatchOutcome::Closest {
                    chosen: candidates.remove(0),
                    candidates: n,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanOrder {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub total_amount: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AmbiguousOrphan {
    pub ticket_id: Uuid,
    pub candidate_orders: Vec<Uuid>,
}

// ── Price inconsistencies and corrections ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionField {
    UnitPrice,
    TotalPrice,
    OrderTotal,
}

impl CorrectionField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionField::UnitPrice => "unit_price",
            CorrectionField::TotalPrice => "total_price",
            CorrectionField::OrderTotal => "total_amount",
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            CorrectionField::UnitPrice | CorrectionField::TotalPrice => EntityType::OrderLineItem,
            CorrectionField::OrderTotal => EntityType::Order,
        }
    }
}

/// A detected inconsistency with the value that should replace it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub target_id: Uuid,
    pub order_id: Uuid,
    pub field: CorrectionField,
    pub old_value: BigDecimal,
    pub new_value: BigDecimal,
    pub reason: CorrectionType,
}

impl Correction {
    pub fn audit_entry(&self, execution_id: Uuid, now: DateTime<Utc>) -> AuditEntry {
        let field = self.field.as_str();
        AuditEntry::new(
            execution_id,
            self.field.entity_type(),
            self.target_id,
            self.reason,
            json!({ field: self.old_value.to_string() }),
            json!({ field: self.new_value.to_string() }),
            now,
        )
        .with_metadata(json!({ "order_id": self.order_id }))
    }
}

/// Compute the corrections that make the given pending orders consistent.
///
/// Only lines the classifier resolves to a ticket are priced: the canonical
/// unit price is the catalog price for the resolved event when one exists,
/// otherwise the highest unit price seen for that event within the same
/// order. Every line's total is then checked against unit × quantity, and
/// finally the order total is compared to the sum of the corrected totals.
pub fn detect_price_corrections(
    batches: &[OrderBatch],
    catalog: &HashMap<Uuid, BigDecimal>,
    classifier: &TicketClassifier,
    epsilon: &BigDecimal,
) -> Vec<Correction> {
    let mut corrections = Vec::new();

    for batch in batches {
        let events: Vec<Option<Uuid>> = batch
            .items
            .iter()
            .map(|item| ticket_event(classifier, item))
            .collect();

        let mut highest_by_event: BTreeMap<Uuid, BigDecimal> = BTreeMap::new();
        let mut distinct_by_event: BTreeMap<Uuid, Vec<BigDecimal>> = BTreeMap::new();
        for (item, event) in batch.items.iter().zip(&events) {
            let Some(event_id) = *event else {
                continue;
            };
            let seen = distinct_by_event.entry(event_id).or_default();
            if !seen.iter().any(|p| !differs(p, &item.unit_price, epsilon)) {
                seen.push(item.unit_price.clone());
            }
            highest_by_event
                .entry(event_id)
                .and_modify(|p| {
                    if item.unit_price > *p {
                        *p = item.unit_price.clone();
                    }
                })
                .or_insert_with(|| item.unit_price.clone());
        }

        let mut corrected_sum = BigDecimal::from(0);
        for (item, event) in batch.items.iter().zip(&events) {
            let mut unit = item.unit_price.clone();
            if let Some(event_id) = *event {
                let (canonical, reason) = match catalog.get(&event_id) {
                    Some(price) => (Some(price.clone()), CorrectionType::PriceMismatch),
                    None if distinct_by_event.get(&event_id).map_or(0, Vec::len) > 1 => (
                        highest_by_event.get(&event_id).cloned(),
                        CorrectionType::IntraOrderInconsistency,
                    ),
                    None => (None, CorrectionType::PriceMismatch),
                };
                if let Some(canonical) = canonical {
                    if differs(&item.unit_price, &canonical, epsilon) {
                        corrections.push(Correction {
                            target_id: item.id,
                            order_id: batch.order.id,
                            field: CorrectionField::UnitPrice,
                            old_value: item.unit_price.clone(),
                            new_value: canonical.clone(),
                            reason,
                        });
                        unit = canonical;
                    }
                }
            }

            let expected_total = money(&unit * BigDecimal::from(item.quantity));
            if differs(&item.total_price, &expected_total, epsilon) {
                let reason = if unit == item.unit_price {
                    CorrectionType::TotalMismatch
                } else {
                    corrections
                        .last()
                        .map(|c| c.reason)
                        .unwrap_or(CorrectionType::TotalMismatch)
                };
                corrections.push(Correction {
                    target_id: item.id,
                    order_id: batch.order.id,
                    field: CorrectionField::TotalPrice,
                    old_value: item.total_price.clone(),
                    new_value: expected_total.clone(),
                    reason,
                });
            }
            corrected_sum += expected_total;
        }

        if !batch.items.is_empty() && differs(&batch.order.total_amount, &corrected_sum, epsilon) {
            corrections.push(Correction {
                target_id: batch.order.id,
                order_id: batch.order.id,
                field: CorrectionField::OrderTotal,
                old_value: batch.order.total_amount.clone(),
                new_value: money(corrected_sum),
                reason: CorrectionType::OrderTotalMismatch,
            });
        }
    }

    corrections
}

/// The event a line is priced against, or `None` when it is not a ticket.
pub fn ticket_event(classifier: &TicketClassifier, item: &LineItem) -> Option<Uuid> {
    match classifier.classify(item) {
        Classification::Ticket { event_id, .. } => Some(event_id),
        _ => None,
    }
}
