use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Seat pool exhausted (capacity {capacity})")]
    CapacityExhausted { capacity: i32 },
    #[error("Store failure: {0}")]
    Store(String),
}

impl DomainError {
    /// Transient failures may be retried by the caller; issuance is idempotent
    /// and corrections are applied per row.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Store(_))
    }
}

/// Failure talking to the payment gateway. Counted against the run's API
/// success rate; never aborts a pass.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}
