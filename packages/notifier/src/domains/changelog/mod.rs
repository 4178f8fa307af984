//! Change-log extraction and enrichment.

pub mod extractor;
pub mod models;
