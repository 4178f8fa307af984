//! Candidate construction and the filter pipeline.

pub mod candidates;
pub mod filters;
pub mod models;
