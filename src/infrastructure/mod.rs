pub mod issuance_repo;
#[cfg(test)]
pub mod memory;
pub mod models;
pub mod monitoring_repo;
pub mod pg_store;
pub mod reconciliation_repo;

pub use pg_store::PgStore;
pub use reconciliation_repo::StoredChargeLookup;
