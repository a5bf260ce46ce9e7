pub mod backup_exchange;
pub mod catalog;
pub mod classify;
pub mod core;
pub mod dashboard;
pub mod performance;
pub mod reports;
pub mod setup;
