use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel::sql_types::Int4;
use log::info;

use crate::db::DbPool;
use crate::domain::errors::DomainError;
use crate::schema::seat_pool;

pub(crate) const SEAT_POOL_ID: &str = "main";

// ── Error conversions (infrastructure concern only) ──────────────────────────

impl From<diesel::result::Error> for DomainError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                DomainError::Conflict(info.message().to_string())
            }
            other => DomainError::Store(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for DomainError {
    fn from(e: r2d2::Error) -> Self {
        DomainError::Store(e.to_string())
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

/// Postgres-backed implementation of every store port. Cheap to clone; all
/// clones share the pool.
#[derive(Clone)]
pub struct PgStore {
    pub(crate) pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create the seat pool row, or set its capacity to the configured value.
    /// Capacity may be raised or lowered but never drops below the seats
    /// already allocated.
    pub fn ensure_seat_pool(&self, capacity: i32) -> Result<i32, DomainError> {
        let mut conn = self.pool.get()?;
        let effective = diesel::insert_into(seat_pool::table)
            .values((
                seat_pool::id.eq(SEAT_POOL_ID),
                seat_pool::capacity.eq(capacity),
                seat_pool::allocated.eq(0),
            ))
            .on_conflict(seat_pool::id)
            .do_update()
            .set(seat_pool::capacity.eq(sql::<Int4>(
                "GREATEST(EXCLUDED.capacity, seat_pool.allocated)",
            )))
            .returning(seat_pool::capacity)
            .get_result::<i32>(&mut conn)?;
        info!("Seat pool ready with capacity {}", effective);
        Ok(effective)
    }
}
