use std::collections::HashMap;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::{DomainError, GatewayError};
use super::lock::LockLease;
use super::monitoring::{Alert, ExecutionMetric};
use super::order::{LineItem, OrderBatch, OrderRecord, OrderStatus};
use super::reconciliation::{AuditEntry, Correction};
use super::ticket::{NewTicket, TicketRecord};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        self.as_ref().now()
    }
}

/// Operations available inside one issuance transaction. Everything done
/// through it commits together or not at all.
pub trait IssuanceTx {
    /// Load the order and hold it exclusively until the transaction ends.
    fn lock_order(&mut self, order_id: Uuid) -> Result<Option<OrderRecord>, DomainError>;
    fn tickets_for_order(&mut self, order_id: Uuid) -> Result<Vec<TicketRecord>, DomainError>;
    /// Atomically take the next seat from the pool, or fail with
    /// `DomainError::CapacityExhausted`.
    fn allocate_next_seat(&mut self) -> Result<i32, DomainError>;
    fn insert_tickets(&mut self, tickets: &[NewTicket]) -> Result<(), DomainError>;
    fn set_order_status(
        &mut self,
        order_id: Uuid,
        status: OrderStatus,
        reason: Option<&str>,
    ) -> Result<(), DomainError>;
    fn append_audit(&mut self, entries: &[AuditEntry]) -> Result<(), DomainError>;
}

pub trait IssuanceStore: Send + Sync + 'static {
    fn transaction<T, F>(&self, f: F) -> Result<T, DomainError>
    where
        F: FnOnce(&mut dyn IssuanceTx) -> Result<T, DomainError>;
    fn line_items_for_order(&self, order_id: Uuid) -> Result<Vec<LineItem>, DomainError>;
    fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<TicketRecord>, DomainError>;
}

pub trait LockStore: Send + Sync + 'static {
    /// Insert the lock row, or take it over if the current lease expired by
    /// `now`. Returns whether `holder` now owns the lock.
    fn try_acquire(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, DomainError>;
    /// Delete the lock row only if `holder` still owns it.
    fn release(&self, holder: &str) -> Result<bool, DomainError>;
    fn current(&self) -> Result<Option<LockLease>, DomainError>;
}

pub trait ReconciliationStore: Send + Sync + 'static {
    fn orphan_tickets_created_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<TicketRecord>, DomainError>;
    fn line_items_referencing_ticket(&self, ticket_id: Uuid) -> Result<Vec<LineItem>, DomainError>;
    /// Link an orphan ticket to an order and record the audit entry, in one
    /// transaction. Fails with `Conflict` if the ticket is no longer orphaned.
    fn link_orphan_ticket(
        &self,
        ticket_id: Uuid,
        order_id: Uuid,
        audit: &AuditEntry,
    ) -> Result<(), DomainError>;
    fn pending_orders_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OrderRecord>, DomainError>;
    fn pending_order_batches_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<OrderBatch>, DomainError>;
    fn catalog_prices(&self, event_ids: &[Uuid]) -> Result<HashMap<Uuid, BigDecimal>, DomainError>;
    /// Apply one correction and its audit entry in their own transaction. The
    /// update only happens if the field still holds `old_value`.
    fn apply_correction(&self, correction: &Correction, audit: &AuditEntry)
        -> Result<(), DomainError>;
}

pub trait MonitoringStore: Send + Sync + 'static {
    fn ping(&self) -> Result<(), DomainError>;
    fn insert_metric(&self, metric: &ExecutionMetric) -> Result<(), DomainError>;
    fn insert_alerts(&self, alerts: &[Alert]) -> Result<(), DomainError>;
    fn metrics_since(&self, since: DateTime<Utc>) -> Result<Vec<ExecutionMetric>, DomainError>;
    fn latest_metric(&self) -> Result<Option<ExecutionMetric>, DomainError>;
    fn alerts_since(&self, since: DateTime<Utc>) -> Result<Vec<Alert>, DomainError>;
}

/// Lookup of the external charge backing an order.
pub trait PaymentGateway: Send + Sync + 'static {
    fn find_charge(&self, order: &OrderRecord) -> Result<Option<String>, GatewayError>;
}
