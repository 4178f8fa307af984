//! Subscriber candidate model.
//!
//! Subscribers are reconstructed fresh for every event from the current
//! preference tables; only the filtered, final list matters, nothing here
//! is persisted back.

use crate::common::geo::Coords;

/// A notification recipient candidate.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub user_id: i64,
    pub username: Option<String>,
    pub role: Option<String>,
    pub home_coords: Option<Coords>,
    /// Subscribed to all notification kinds (preference 30), not just the
    /// kind of the current event.
    pub all_kinds: bool,
    /// Subscribed to more than one region; single-region users never see
    /// the redundant region tag.
    pub multi_region: bool,
    /// Lifetime count of new-search notifications already sent; drives
    /// the decaying tip cadence.
    pub new_search_count: i64,
    /// Accepted age ranges; empty = no restriction.
    pub age_ranges: Vec<(i32, i32)>,
    /// Maximum radius in km; None = no restriction.
    pub radius_km: Option<f64>,
}

impl Subscriber {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            username: None,
            role: None,
            home_coords: None,
            all_kinds: false,
            multi_region: false,
            new_search_count: 0,
            age_ranges: Vec::new(),
            radius_km: None,
        }
    }
}
