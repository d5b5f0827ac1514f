//! Payment settlement engine: pending-payment ledger, remote verification,
//! retry with classification, order recovery, and operational surfaces.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod orders;
pub mod processor;
pub mod settlement;
pub mod workers;
