//! In-memory store for service tests. Transactions run against a copy of the
//! state that replaces the original only when the closure succeeds.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::errors::{DomainError, GatewayError};
use crate::domain::lock::LockLease;
use crate::domain::monitoring::{Alert, ExecutionMetric};
use crate::domain::order::{LineItem, OrderBatch, OrderRecord, OrderStatus};
use crate::domain::ports::{
    Clock, IssuanceStore, IssuanceTx, LockStore, MonitoringStore, PaymentGateway,
    ReconciliationStore,
};
use crate::domain::reconciliation::{AuditEntry, Correction, CorrectionField};
use crate::domain::ticket::{NewTicket, TicketRecord};

#[derive(Debug, Clone, Default)]
pub struct State {
    pub orders: HashMap<Uuid, OrderRecord>,
    pub line_items: Vec<LineItem>,
    pub tickets: Vec<TicketRecord>,
    pub catalog: HashMap<Uuid, BigDecimal>,
    pub seat_capacity: i32,
    pub seats_allocated: i32,
    pub audit: Vec<AuditEntry>,
    pub lock: Option<LockLease>,
    pub metrics: Vec<ExecutionMetric>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Default)]
struct Faults {
    fail_allocation_after: Option<usize>,
    fail_corrections_for: HashSet<Uuid>,
    unavailable: bool,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Mutex<Faults>>,
}

fn poisoned<T>(_: T) -> DomainError {
    DomainError::Store("memory store mutex poisoned".to_string())
}

impl MemoryStore {
    pub fn with_capacity(seat_capacity: i32) -> Self {
        let store = Self::default();
        store.update(|s| s.seat_capacity = seat_capacity);
        store
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, State>, DomainError> {
        self.state.lock().map_err(poisoned)
    }

    fn faults(&self) -> Result<Faults, DomainError> {
        Ok(self.faults.lock().map_err(poisoned)?.clone())
    }

    fn check_available(&self) -> Result<(), DomainError> {
        if self.faults()?.unavailable {
            return Err(DomainError::Store("connection refused".to_string()));
        }
        Ok(())
    }

    /// Mutate state directly, for test setup.
    pub fn update(&self, f: impl FnOnce(&mut State)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
    }

    pub fn snapshot(&self) -> State {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Seat allocation fails with a store error after `n` successful
    /// allocations within one transaction.
    pub fn fail_allocation_after(&self, n: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_allocation_after = Some(n);
        }
    }

    pub fn fail_corrections_for(&self, target_id: Uuid) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_corrections_for.insert(target_id);
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.unavailable = unavailable;
        }
    }
}

struct MemoryTx {
    state: State,
    faults: Faults,
    allocations: usize,
}

impl IssuanceTx for MemoryTx {
    fn lock_order(&mut self, order_id: Uuid) -> Result<Option<OrderRecord>, DomainError> {
        Ok(self.state.orders.get(&order_id).cloned())
    }

    fn tickets_for_order(&mut self, order_id: Uuid) -> Result<Vec<TicketRecord>, DomainError> {
        Ok(tickets_of(&self.state, order_id))
    }

    fn allocate_next_seat(&mut self) -> Result<i32, DomainError> {
        if self.faults.fail_allocation_after == Some(self.allocations) {
            return Err(DomainError::Store("injected allocation failure".to_string()));
        }
        if self.state.seats_allocated >= self.state.seat_capacity {
            return Err(DomainError::CapacityExhausted {
                capacity: self.state.seat_capacity,
            });
        }
        self.state.seats_allocated += 1;
        self.allocations += 1;
        Ok(self.state.seats_allocated)
    }

    fn insert_tickets(&mut self, tickets: &[NewTicket]) -> Result<(), DomainError> {
        for ticket in tickets {
            if self
                .state
                .tickets
                .iter()
                .any(|t| t.seat_number == Some(ticket.seat_number))
            {
                return Err(DomainError::Conflict(format!(
                    "seat {} already taken",
                    ticket.seat_number
                )));
            }
            self.state.tickets.push(ticket.clone().into_record());
        }
        Ok(())
    }

    fn set_order_status(
        &mut self,
        order_id: Uuid,
        status: OrderStatus,
        reason: Option<&str>,
    ) -> Result<(), DomainError> {
        let order = self
            .state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| DomainError::NotFound(format!("order {order_id}")))?;
        order.status = status;
        order.status_reason = reason.map(str::to_string);
        Ok(())
    }

    fn append_audit(&mut self, entries: &[AuditEntry]) -> Result<(), DomainError> {
        self.state.audit.extend_from_slice(entries);
        Ok(())
    }
}

fn tickets_of(state: &State, order_id: Uuid) -> Vec<TicketRecord> {
    let mut tickets: Vec<TicketRecord> = state
        .tickets
        .iter()
        .filter(|t| t.order_id == Some(order_id))
        .cloned()
        .collect();
    tickets.sort_by_key(|t| t.seat_number);
    tickets
}

impl IssuanceStore for MemoryStore {
    fn transaction<T, F>(&self, f: F) -> Result<T, DomainError>
    where
        F: FnOnce(&mut dyn IssuanceTx) -> Result<T, DomainError>,
    {
        self.check_available()?;
        let faults = self.faults()?;
        let mut guard = self.lock_state()?;
        let mut tx = MemoryTx {
            state: guard.clone(),
            faults,
            allocations: 0,
        };
        let result = f(&mut tx)?;
        *guard = tx.state;
        Ok(result)
    }

    fn line_items_for_order(&self, order_id: Uuid) -> Result<Vec<LineItem>, DomainError> {
        self.check_available()?;
        Ok(self
            .lock_state()?
            .line_items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<TicketRecord>, DomainError> {
        self.check_available()?;
        Ok(tickets_of(&*self.lock_state()?, order_id))
    }
}

impl LockStore for MemoryStore {
    fn try_acquire(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        self.check_available()?;
        let mut state = self.lock_state()?;
        if state.lock.as_ref().is_some_and(|l| !l.is_expired(now)) {
            return Ok(false);
        }
        state.lock = Some(LockLease {
            holder: holder.to_string(),
            acquired_at: now,
            expires_at,
        });
        Ok(true)
    }

    fn release(&self, holder: &str) -> Result<bool, DomainError> {
        self.check_available()?;
        let mut state = self.lock_state()?;
        if state.lock.as_ref().is_some_and(|l| l.holder == holder) {
            state.lock = None;
            return Ok(true);
        }
        Ok(false)
    }

    fn current(&self) -> Result<Option<LockLease>, DomainError> {
        self.check_available()?;
        Ok(self.lock_state()?.lock.clone())
    }
}

impl ReconciliationStore for MemoryStore {
    fn orphan_tickets_created_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<TicketRecord>, DomainError> {
        self.check_available()?;
        Ok(self
            .lock_state()?
            .tickets
            .iter()
            .filter(|t| t.order_id.is_none() && t.created_at >= since)
            .cloned()
            .collect())
    }

    fn line_items_referencing_ticket(&self, ticket_id: Uuid) -> Result<Vec<LineItem>, DomainError> {
        self.check_available()?;
        Ok(self
            .lock_state()?
            .line_items
            .iter()
            .filter(|i| i.ticket_id == Some(ticket_id))
            .cloned()
            .collect())
    }

    fn link_orphan_ticket(
        &self,
        ticket_id: Uuid,
        order_id: Uuid,
        audit: &AuditEntry,
    ) -> Result<(), DomainError> {
        self.check_available()?;
        let mut state = self.lock_state()?;
        let ticket = state
            .tickets
            .iter_mut()
            .find(|t| t.id == ticket_id && t.order_id.is_none())
            .ok_or_else(|| DomainError::Conflict(format!("ticket {ticket_id} is not orphaned")))?;
        ticket.order_id = Some(order_id);
        state.audit.push(audit.clone());
        Ok(())
    }

    fn pending_orders_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OrderRecord>, DomainError> {
        self.check_available()?;
        let mut orders: Vec<OrderRecord> = self
            .lock_state()?
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.created_at >= from && o.created_at <= to)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    fn pending_order_batches_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<OrderBatch>, DomainError> {
        self.check_available()?;
        let state = self.lock_state()?;
        let mut batches: Vec<OrderBatch> = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.created_at >= since)
            .map(|o| OrderBatch {
                order: o.clone(),
                items: state
                    .line_items
                    .iter()
                    .filter(|i| i.order_id == o.id)
                    .cloned()
                    .collect(),
            })
            .collect();
        batches.sort_by_key(|b| b.order.created_at);
        Ok(batches)
    }

    fn catalog_prices(&self, event_ids: &[Uuid]) -> Result<HashMap<Uuid, BigDecimal>, DomainError> {
        self.check_available()?;
        let state = self.lock_state()?;
        Ok(event_ids
            .iter()
            .filter_map(|id| state.catalog.get(id).map(|p| (*id, p.clone())))
            .collect())
    }

    fn apply_correction(
        &self,
        correction: &Correction,
        audit: &AuditEntry,
    ) -> Result<(), DomainError> {
        self.check_available()?;
        if self.faults()?.fail_corrections_for.contains(&correction.target_id) {
            return Err(DomainError::Store("injected correction failure".to_string()));
        }
        let mut state = self.lock_state()?;
        let stale = || {
            DomainError::Conflict(format!(
                "{} of {} changed since detection",
                correction.field.as_str(),
                correction.target_id
            ))
        };
        match correction.field {
            CorrectionField::UnitPrice | CorrectionField::TotalPrice => {
                let item = state
                    .line_items
                    .iter_mut()
                    .find(|i| i.id == correction.target_id)
                    .ok_or_else(stale)?;
                let field = if correction.field == CorrectionField::UnitPrice {
                    &mut item.unit_price
                } else {
                    &mut item.total_price
                };
                if *field != correction.old_value {
                    return Err(stale());
                }
                *field = correction.new_value.clone();
            }
            CorrectionField::OrderTotal => {
                let order = state
                    .orders
                    .get_mut(&correction.target_id)
                    .filter(|o| o.total_amount == correction.old_value)
                    .ok_or_else(stale)?;
                order.total_amount = correction.new_value.clone();
            }
        }
        state.audit.push(audit.clone());
        Ok(())
    }
}

impl MonitoringStore for MemoryStore {
    fn ping(&self) -> Result<(), DomainError> {
        self.check_available()
    }

    fn insert_metric(&self, metric: &ExecutionMetric) -> Result<(), DomainError> {
        self.check_available()?;
        self.lock_state()?.metrics.push(metric.clone());
        Ok(())
    }

    fn insert_alerts(&self, alerts: &[Alert]) -> Result<(), DomainError> {
        self.check_available()?;
        self.lock_state()?.alerts.extend_from_slice(alerts);
        Ok(())
    }

    fn metrics_since(&self, since: DateTime<Utc>) -> Result<Vec<ExecutionMetric>, DomainError> {
        self.check_available()?;
        Ok(self
            .lock_state()?
            .metrics
            .iter()
            .filter(|m| m.started_at >= since)
            .cloned()
            .collect())
    }

    fn latest_metric(&self) -> Result<Option<ExecutionMetric>, DomainError> {
        self.check_available()?;
        Ok(self
            .lock_state()?
            .metrics
            .iter()
            .max_by_key(|m| m.started_at)
            .cloned())
    }

    fn alerts_since(&self, since: DateTime<Utc>) -> Result<Vec<Alert>, DomainError> {
        self.check_available()?;
        Ok(self
            .lock_state()?
            .alerts
            .iter()
            .filter(|a| a.created_at >= since)
            .cloned()
            .collect())
    }
}

/// Gateway double: orders listed in `charges` have a charge.
#[derive(Clone, Default)]
pub struct MemoryGateway {
    charges: Arc<Mutex<HashSet<Uuid>>>,
    failing: Arc<Mutex<HashSet<Uuid>>>,
}

impl MemoryGateway {
    pub fn add_charge(&self, order_id: Uuid) {
        if let Ok(mut charges) = self.charges.lock() {
            charges.insert(order_id);
        }
    }

    pub fn fail_for(&self, order_id: Uuid) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(order_id);
        }
    }
}

impl PaymentGateway for MemoryGateway {
    fn find_charge(&self, order: &OrderRecord) -> Result<Option<String>, GatewayError> {
        let failing = self
            .failing
            .lock()
            .map_err(|_| GatewayError::Unavailable("poisoned".to_string()))?;
        if failing.contains(&order.id) {
            return Err(GatewayError::Unavailable("timeout".to_string()));
        }
        let charges = self
            .charges
            .lock()
            .map_err(|_| GatewayError::Unavailable("poisoned".to_string()))?;
        Ok(charges.contains(&order.id).then(|| format!("pay_{}", order.id.simple())))
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|_| Utc::now())
    }
}
