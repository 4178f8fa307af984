//! Business domains of the notification engine.

pub mod changelog;
pub mod compose;
pub mod mailing;
pub mod subscribers;
