//! Notification persistence and the durable idempotency ledger.

pub mod maker;
pub mod models;
