// Search & Rescue Notifier - fan-out core
//
// This crate consumes the scraper's change log, decides which volunteers
// should hear about each change, composes the messages, and records them
// for the delivery worker. One change-log event per invocation; backlog
// draining happens through queue continuation signals.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
