pub mod credential;
pub mod errors;
pub mod lock;
pub mod monitoring;
pub mod order;
pub mod ports;
pub mod reconciliation;
pub mod ticket;
