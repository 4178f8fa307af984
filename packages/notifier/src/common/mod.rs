//! Pure helpers shared across domains.

pub mod geo;
pub mod text;
