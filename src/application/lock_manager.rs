use chrono::Duration;
use log::{debug, warn};

use crate::domain::errors::DomainError;
use crate::domain::lock::LockLease;
use crate::domain::ports::{Clock, LockStore};

/// Grants at most one concurrent reconciliation run across processes.
///
/// A holder that outlives its lease can be overtaken by a new holder; the
/// TTL must exceed the worst-case run duration.
pub struct ExecutionLockManager<L, C> {
    store: L,
    clock: C,
    ttl: Duration,
}

impl<L: LockStore, C: Clock> ExecutionLockManager<L, C> {
    pub fn new(store: L, clock: C, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn acquire(&self, holder: &str) -> Result<bool, DomainError> {
        let now = self.clock.now();
        let acquired = self.store.try_acquire(holder, now, now + self.ttl)?;
        if acquired {
            debug!("Lock acquired by {} until {}", holder, now + self.ttl);
        }
        Ok(acquired)
    }

    pub fn release(&self, holder: &str) -> Result<(), DomainError> {
        if !self.store.release(holder)? {
            warn!(
                "Lock no longer held by {} at release; it expired and was reclaimed",
                holder
            );
        }
        Ok(())
    }

    pub fn current(&self) -> Result<Option<LockLease>, DomainError> {
        self.store.current()
    }
}
