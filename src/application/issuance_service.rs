use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::credential::{encode_credential, new_ticket_identity};
use crate::domain::errors::DomainError;
use crate::domain::order::{CustomerData, LineItem, OrderStatus};
use crate::domain::ports::{Clock, IssuanceStore, IssuanceTx, SystemClock};
use crate::domain::reconciliation::{AuditEntry, CorrectionType, EntityType};
use crate::domain::ticket::{
    expand_units, Classification, NewTicket, TicketClassifier, TicketRecord, UnitTicket,
};

#[derive(Debug, Error)]
pub enum IssuanceError {
    /// Fatal for the order: nothing was issued and the order needs a refund.
    #[error("Sold out: seat pool exhausted (capacity {capacity}) while issuing order {order_id}")]
    CapacityExhausted {
        order_id: Uuid,
        capacity: i32,
        refund_marked: bool,
    },
    #[error("Order {0} not found")]
    OrderNotFound(Uuid),
    #[error("Order {order_id} is {status}, tickets are only issued for paid orders")]
    OrderNotPaid { order_id: Uuid, status: OrderStatus },
    #[error("Line item {line_item_id} does not belong to order {order_id}")]
    ForeignLineItem { order_id: Uuid, line_item_id: Uuid },
    #[error("Ticket line item {0} has no event reference")]
    UnresolvedEvent(Uuid),
    #[error(transparent)]
    Store(DomainError),
}

impl From<DomainError> for IssuanceError {
    fn from(e: DomainError) -> Self {
        IssuanceError::Store(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuanceDisposition {
    Issued,
    /// Tickets already existed; nothing was created.
    AlreadyIssued,
    /// The order has no ticket-bearing lines; zero tickets is a success.
    NoTicketItems,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuanceOutcome {
    pub order_id: Uuid,
    pub disposition: IssuanceDisposition,
    pub tickets: Vec<TicketRecord>,
}

impl IssuanceOutcome {
    pub fn ticket_ids(&self) -> Vec<Uuid> {
        self.tickets.iter().map(|t| t.id).collect()
    }

    pub fn seat_numbers(&self) -> Vec<i32> {
        self.tickets.iter().filter_map(|t| t.seat_number).collect()
    }
}

enum Attempt {
    Issued(Vec<NewTicket>),
    AlreadyIssued(Vec<TicketRecord>),
    NoTicketItems,
    OrderMissing,
    NotPaid(OrderStatus),
}

pub struct IssuanceService<S, C = SystemClock> {
    store: S,
    clock: C,
    classifier: TicketClassifier,
}

impl<S: IssuanceStore, C: Clock> IssuanceService<S, C> {
    pub fn new(store: S, clock: C, classifier: TicketClassifier) -> Self {
        Self {
            store,
            clock,
            classifier,
        }
    }

    /// Issue tickets for a paid order using the line items on record. The
    /// webhook payload only identifies the order; quantities and prices are
    /// never taken from it.
    pub fn issue_for_order(
        &self,
        order_id: Uuid,
        customer: &CustomerData,
    ) -> Result<IssuanceOutcome, IssuanceError> {
        let line_items = self.store.line_items_for_order(order_id)?;
        self.issue_tickets(order_id, &line_items, customer)
    }

    /// Expand the ticket-bearing lines of `order_id` into one ticket per unit
    /// and commit them, with their seats, as a single transaction.
    ///
    /// Safe to call repeatedly: once tickets exist for the order they are
    /// returned unchanged.
    pub fn issue_tickets(
        &self,
        order_id: Uuid,
        line_items: &[LineItem],
        customer: &CustomerData,
    ) -> Result<IssuanceOutcome, IssuanceError> {
        let units = self.plan_units(order_id, line_items)?;
        let execution_id = Uuid::new_v4();
        let now = self.clock.now();

        let attempt = self.store.transaction(|tx| {
            let Some(order) = tx.lock_order(order_id)? else {
                return Ok(Attempt::OrderMissing);
            };
            let existing = tx.tickets_for_order(order_id)?;
            if !existing.is_empty() {
                return Ok(Attempt::AlreadyIssued(existing));
            }
            if order.status != OrderStatus::Paid {
                return Ok(Attempt::NotPaid(order.status));
            }
            if units.is_empty() {
                return Ok(Attempt::NoTicketItems);
            }

            let tickets = allocate_tickets(tx, order_id, &units, customer, now)?;
            tx.insert_tickets(&tickets)?;
            let audit: Vec<AuditEntry> = tickets
                .iter()
                .zip(&units)
                .map(|(ticket, unit)| {
                    AuditEntry::new(
                        execution_id,
                        EntityType::Ticket,
                        ticket.id,
                        CorrectionType::TicketIssued,
                        json!({}),
                        json!({
                            "order_id": order_id,
                            "seat_number": ticket.seat_number,
                            "price": ticket.price.to_string(),
                        }),
                        now,
                    )
                    .with_metadata(json!({
                        "line_item_id": unit.line_item_id,
                        "classification_rule": unit.rule.as_str(),
                    }))
                })
                .collect();
            tx.append_audit(&audit)?;
            Ok(Attempt::Issued(tickets))
        });

        match attempt {
            Ok(Attempt::Issued(tickets)) => {
                info!(
                    "Issued {} ticket(s) for order {} (seats {:?})",
                    tickets.len(),
                    order_id,
                    tickets.iter().map(|t| t.seat_number).collect::<Vec<_>>()
                );
                Ok(IssuanceOutcome {
                    order_id,
                    disposition: IssuanceDisposition::Issued,
                    tickets: tickets.into_iter().map(NewTicket::into_record).collect(),
                })
            }
            Ok(Attempt::AlreadyIssued(tickets)) => {
                info!(
                    "Order {} already has {} ticket(s); returning existing set",
                    order_id,
                    tickets.len()
                );
                Ok(IssuanceOutcome {
                    order_id,
                    disposition: IssuanceDisposition::AlreadyIssued,
                    tickets,
                })
            }
            Ok(Attempt::NoTicketItems) => {
                info!("Order {} has no ticket-bearing items", order_id);
                Ok(IssuanceOutcome {
                    order_id,
                    disposition: IssuanceDisposition::NoTicketItems,
                    tickets: Vec::new(),
                })
            }
            Ok(Attempt::OrderMissing) => Err(IssuanceError::OrderNotFound(order_id)),
            Ok(Attempt::NotPaid(status)) => Err(IssuanceError::OrderNotPaid { order_id, status }),
            Err(DomainError::CapacityExhausted { capacity }) => {
                warn!(
                    "Seat pool exhausted (capacity {}) while issuing order {}; marking refund_required",
                    capacity, order_id
                );
                let refund_marked = match self.mark_refund_required(order_id, capacity, execution_id) {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Failed to mark order {} refund_required: {}", order_id, e);
                        false
                    }
                };
                Err(IssuanceError::CapacityExhausted {
                    order_id,
                    capacity,
                    refund_marked,
                })
            }
            Err(e) => Err(IssuanceError::Store(e)),
        }
    }

    pub fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<TicketRecord>, DomainError> {
        self.store.tickets_for_order(order_id)
    }

    fn plan_units(
        &self,
        order_id: Uuid,
        line_items: &[LineItem],
    ) -> Result<Vec<UnitTicket>, IssuanceError> {
        let mut units = Vec::new();
        for item in line_items {
            if item.order_id != order_id {
                return Err(IssuanceError::ForeignLineItem {
                    order_id,
                    line_item_id: item.id,
                });
            }
            match self.classifier.classify(item) {
                Classification::Ticket { rule, event_id } => {
                    debug!(
                        "Line item {} ('{}') is a ticket by rule {}",
                        item.id,
                        item.name,
                        rule.as_str()
                    );
                    units.extend(expand_units(item, event_id, rule));
                }
                Classification::Unresolved { rule } => {
                    warn!(
                        "Line item {} ('{}') matched rule {} but has no event",
                        item.id,
                        item.name,
                        rule.as_str()
                    );
                    return Err(IssuanceError::UnresolvedEvent(item.id));
                }
                Classification::NotTicket { rule } => {
                    debug!(
                        "Line item {} ('{}') is not a ticket (rule {})",
                        item.id,
                        item.name,
                        rule.map_or("none", |r| r.as_str())
                    );
                }
            }
        }
        Ok(units)
    }

    fn mark_refund_required(
        &self,
        order_id: Uuid,
        capacity: i32,
        execution_id: Uuid,
    ) -> Result<(), DomainError> {
        let reason = format!("sold out: seat pool exhausted (capacity {capacity})");
        let now = self.clock.now();
        self.store.transaction(|tx| {
            let Some(order) = tx.lock_order(order_id)? else {
                return Err(DomainError::NotFound(format!("order {order_id}")));
            };
            tx.set_order_status(order_id, OrderStatus::RefundRequired, Some(&reason))?;
            tx.append_audit(&[AuditEntry::new(
                execution_id,
                EntityType::Order,
                order_id,
                CorrectionType::OrderStatusChanged,
                json!({ "status": order.status.as_str() }),
                json!({ "status": OrderStatus::RefundRequired.as_str(), "reason": reason }),
                now,
            )])
        })
    }
}

fn allocate_tickets(
    tx: &mut dyn IssuanceTx,
    order_id: Uuid,
    units: &[UnitTicket],
    customer: &CustomerData,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<NewTicket>, DomainError> {
    let mut tickets = Vec::with_capacity(units.len());
    for unit in units {
        let seat_number = tx.allocate_next_seat()?;
        let id = new_ticket_identity();
        tickets.push(NewTicket {
            id,
            event_id: unit.event_id,
            order_id,
            line_item_id: unit.line_item_id,
            user_id: customer.user_id,
            customer_name: customer.name.clone(),
            customer_email: customer.email.clone(),
            seat_number,
            qr_payload: encode_credential(id, unit.event_id, now),
            price: unit.price.clone(),
            created_at: now,
        });
    }
    Ok(tickets)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;
    use std::thread;

    use bigdecimal::BigDecimal;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::order::OrderRecord;
    use crate::infrastructure::memory::{ManualClock, MemoryStore};

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).expect("valid decimal")
    }

    fn service(store: &MemoryStore) -> IssuanceService<MemoryStore, Arc<ManualClock>> {
        let clock = ManualClock::at(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
                .single()
                .expect("valid date"),
        );
        IssuanceService::new(
            store.clone(),
            clock,
            TicketClassifier::new(vec!["ingresso".to_string()], None),
        )
    }

    fn paid_order(store: &MemoryStore, lines: &[(Uuid, i32, &str)]) -> (Uuid, Vec<LineItem>) {
        let order_id = Uuid::new_v4();
        let items: Vec<LineItem> = lines
            .iter()
            .map(|(event_id, qty, unit)| LineItem {
                id: Uuid::new_v4(),
                order_id,
                ticket_id: None,
                product_id: None,
                name: "Ingresso".to_string(),
                item_type: Some("ticket".to_string()),
                event_id: Some(*event_id),
                quantity: *qty,
                unit_price: dec(unit),
                total_price: dec(unit) * BigDecimal::from(*qty),
                created_at: Utc::now(),
            })
            .collect();
        let order = OrderRecord {
            id: order_id,
            customer_id: Uuid::new_v4(),
            status: OrderStatus::Paid,
            status_reason: None,
            total_amount: items.iter().map(|i| i.total_price.clone()).sum(),
            customer_email: Some("buyer@example.com".to_string()),
            gateway_charge_id: Some("pay_1".to_string()),
            created_at: Utc::now(),
        };
        let stored = items.clone();
        store.update(move |s| {
            s.orders.insert(order_id, order);
            s.line_items.extend(stored);
        });
        (order_id, items)
    }

    fn customer() -> CustomerData {
        CustomerData {
            user_id: Some(Uuid::new_v4()),
            name: Some("Ana".to_string()),
            email: Some("buyer@example.com".to_string()),
        }
    }

    #[test]
    fn batch_line_issues_one_ticket_per_unit_with_sequential_seats() {
        let store = MemoryStore::with_capacity(1300);
        let event = Uuid::new_v4();
        let (order_id, items) = paid_order(&store, &[(event, 3, "50.00")]);

        let outcome = service(&store)
            .issue_tickets(order_id, &items, &customer())
            .expect("issuance should succeed");

        assert_eq!(outcome.disposition, IssuanceDisposition::Issued);
        assert_eq!(outcome.seat_numbers(), vec![1, 2, 3]);
        assert!(outcome.tickets.iter().all(|t| t.price == dec("50.00")));
        assert!(outcome.tickets.iter().all(|t| t.event_id == event));
        assert_eq!(store.snapshot().tickets.len(), 3);
        assert_eq!(store.snapshot().audit.len(), 3);
    }

    #[test]
    fn quantity_invariant_holds_across_multiple_lines() {
        let store = MemoryStore::with_capacity(1300);
        let (order_id, items) = paid_order(
            &store,
            &[(Uuid::new_v4(), 2, "50.00"), (Uuid::new_v4(), 4, "80.00")],
        );

        let outcome = service(&store)
            .issue_tickets(order_id, &items, &customer())
            .expect("issuance should succeed");

        assert_eq!(outcome.tickets.len(), 6);
        assert_eq!(store.snapshot().tickets.len(), 6);
    }

    #[test]
    fn second_call_returns_the_same_ticket_set() {
        let store = MemoryStore::with_capacity(1300);
        let (order_id, items) = paid_order(&store, &[(Uuid::new_v4(), 2, "50.00")]);
        let svc = service(&store);

        let first = svc.issue_tickets(order_id, &items, &customer()).expect("first");
        let second = svc.issue_tickets(order_id, &items, &customer()).expect("second");

        assert_eq!(second.disposition, IssuanceDisposition::AlreadyIssued);
        assert_eq!(first.ticket_ids(), second.ticket_ids());
        assert_eq!(first.seat_numbers(), second.seat_numbers());
        assert_eq!(store.snapshot().tickets.len(), 2);
        assert_eq!(store.snapshot().seats_allocated, 2);
    }

    #[test]
    fn issued_tickets_are_listed_in_seat_order() {
        let store = MemoryStore::with_capacity(1300);
        let (order_id, items) = paid_order(&store, &[(Uuid::new_v4(), 3, "50.00")]);
        let svc = service(&store);

        let issued = svc.issue_tickets(order_id, &items, &customer()).expect("issue");
        let listed = svc.tickets_for_order(order_id).expect("list");

        assert_eq!(listed.iter().map(|t| t.id).collect::<Vec<_>>(), issued.ticket_ids());
        assert_eq!(
            listed.iter().map(|t| t.seat_number).collect::<Vec<_>>(),
            vec![Some(1), Some(2), Some(3)]
        );
        assert!(svc.tickets_for_order(Uuid::new_v4()).expect("list").is_empty());
    }

    #[test]
    fn exhausted_pool_issues_nothing_and_requires_refund() {
        let store = MemoryStore::with_capacity(2);
        store.update(|s| s.seats_allocated = 2);
        let (order_id, items) = paid_order(&store, &[(Uuid::new_v4(), 1, "50.00")]);

        let err = service(&store)
            .issue_tickets(order_id, &items, &customer())
            .expect_err("pool is exhausted");

        assert!(matches!(
            err,
            IssuanceError::CapacityExhausted {
                capacity: 2,
                refund_marked: true,
                ..
            }
        ));
        let state = store.snapshot();
        assert!(state.tickets.is_empty());
        assert_eq!(state.orders[&order_id].status, OrderStatus::RefundRequired);
        assert!(state.orders[&order_id]
            .status_reason
            .as_deref()
            .is_some_and(|r| r.contains("sold out")));
    }

    #[test]
    fn exhaustion_midway_rolls_back_every_seat() {
        let store = MemoryStore::with_capacity(3);
        store.update(|s| s.seats_allocated = 1);
        let (order_id, items) = paid_order(&store, &[(Uuid::new_v4(), 3, "50.00")]);

        let err = service(&store)
            .issue_tickets(order_id, &items, &customer())
            .expect_err("only two seats left");

        assert!(matches!(err, IssuanceError::CapacityExhausted { .. }));
        let state = store.snapshot();
        assert!(state.tickets.is_empty());
        assert_eq!(state.seats_allocated, 1);
    }

    #[test]
    fn allocation_failure_leaves_no_partial_ticket_set() {
        let store = MemoryStore::with_capacity(1300);
        store.fail_allocation_after(2);
        let (order_id, items) = paid_order(&store, &[(Uuid::new_v4(), 4, "50.00")]);

        let err = service(&store)
            .issue_tickets(order_id, &items, &customer())
            .expect_err("injected failure");

        assert!(matches!(err, IssuanceError::Store(DomainError::Store(_))));
        let state = store.snapshot();
        assert!(state.tickets.iter().all(|t| t.order_id != Some(order_id)));
        assert_eq!(state.seats_allocated, 0);
        assert_eq!(state.orders[&order_id].status, OrderStatus::Paid);
    }

    #[test]
    fn order_without_ticket_items_succeeds_with_zero_tickets() {
        let store = MemoryStore::with_capacity(1300);
        let (order_id, mut items) = paid_order(&store, &[(Uuid::new_v4(), 1, "30.00")]);
        items[0].item_type = Some("merchandise".to_string());
        items[0].event_id = None;
        items[0].name = "Camiseta".to_string();

        let outcome = service(&store)
            .issue_tickets(order_id, &items, &customer())
            .expect("no ticket items is not an error");

        assert_eq!(outcome.disposition, IssuanceDisposition::NoTicketItems);
        assert!(outcome.tickets.is_empty());
    }

    #[test]
    fn unpaid_order_is_rejected() {
        let store = MemoryStore::with_capacity(1300);
        let (order_id, items) = paid_order(&store, &[(Uuid::new_v4(), 1, "50.00")]);
        store.update(|s| {
            if let Some(o) = s.orders.get_mut(&order_id) {
                o.status = OrderStatus::Pending;
            }
        });

        let err = service(&store)
            .issue_tickets(order_id, &items, &customer())
            .expect_err("pending order");
        assert!(matches!(err, IssuanceError::OrderNotPaid { .. }));
    }

    #[test]
    fn line_item_from_another_order_is_rejected() {
        let store = MemoryStore::with_capacity(1300);
        let (order_id, _) = paid_order(&store, &[(Uuid::new_v4(), 1, "50.00")]);
        let (_, foreign) = paid_order(&store, &[(Uuid::new_v4(), 1, "50.00")]);

        let err = service(&store)
            .issue_tickets(order_id, &foreign, &customer())
            .expect_err("foreign line item");
        assert!(matches!(err, IssuanceError::ForeignLineItem { .. }));
    }

    #[test]
    fn issue_for_order_uses_stored_line_items() {
        let store = MemoryStore::with_capacity(1300);
        let (order_id, _) = paid_order(&store, &[(Uuid::new_v4(), 2, "50.00")]);

        let outcome = service(&store)
            .issue_for_order(order_id, &customer())
            .expect("issuance should succeed");
        assert_eq!(outcome.tickets.len(), 2);
    }

    #[test]
    fn concurrent_issuance_never_shares_a_seat() {
        let store = MemoryStore::with_capacity(1300);
        let orders: Vec<(Uuid, Vec<LineItem>)> = (0..8)
            .map(|_| paid_order(&store, &[(Uuid::new_v4(), 3, "50.00")]))
            .collect();
        let svc = Arc::new(service(&store));

        let handles: Vec<_> = orders
            .into_iter()
            .flat_map(|(order_id, items)| {
                // Duplicate delivery for every order.
                [(order_id, items.clone()), (order_id, items)]
            })
            .map(|(order_id, items)| {
                let svc = Arc::clone(&svc);
                thread::spawn(move || svc.issue_tickets(order_id, &items, &customer()))
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread").expect("issuance");
        }

        let state = store.snapshot();
        assert_eq!(state.tickets.len(), 24);
        let mut seats: Vec<i32> = state.tickets.iter().filter_map(|t| t.seat_number).collect();
        seats.sort_unstable();
        seats.dedup();
        assert_eq!(seats.len(), 24);
        assert!(seats.iter().all(|s| (1..=1300).contains(s)));
    }
}
