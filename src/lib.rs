//! Lifetime-premium payments: gateway abstraction, webhook handling and
//! ledger reconciliation.

pub mod api;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
