pub mod issuance_service;
pub mod lock_manager;
pub mod monitoring_service;
pub mod reconciliation_service;
