use chrono::{DateTime, Utc};
use serde::Serialize;

/// Id of the single lock row guarding reconciliation passes.
pub const LOCK_ID: &str = "singleton";

/// A leased, expiring exclusivity token. An expired lease may be reclaimed
/// by a new holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockLease {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockLease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
