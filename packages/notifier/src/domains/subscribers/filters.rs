//! Subscriber filter pipeline.
//!
//! Five order-sensitive stages, each one only removes members. The stages
//! themselves are pure functions over a prefetched `FilterContext`, so the
//! whole pipeline is unit-testable without a database; `FilterContext::load`
//! is the only I/O.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use sqlx::PgPool;
use tracing::debug;

use crate::common::geo::{distance_km, Coords};
use crate::domains::changelog::models::{ChangeEvent, ChangeKind};

use super::models::Subscriber;

/// Per-topic follow/mute marker for one user.
#[derive(Debug, Clone)]
pub struct FollowRecord {
    pub topic_id: i64,
    pub muted: bool,
}

/// Store-derived inputs for the pure filter stages.
#[derive(Debug, Default)]
pub struct FilterContext {
    /// Users holding the general comment-digest preference (stage 1).
    pub comment_digest_subscribers: HashSet<i64>,
    /// Users with a ledger row for this change-log id and the text kind
    /// (stage 4).
    pub already_notified: HashSet<i64>,
    /// Users with whitelist follow mode enabled (stage 5).
    pub whitelist_users: HashSet<i64>,
    /// Follow/mute markers per whitelist user (stage 5).
    pub follows: HashMap<i64, Vec<FollowRecord>>,
}

impl FilterContext {
    /// Prefetch everything the pipeline needs for this candidate set.
    pub async fn load(pool: &PgPool, event: &ChangeEvent, candidates: &[Subscriber]) -> Result<Self> {
        let user_ids: Vec<i64> = candidates.iter().map(|c| c.user_id).collect();
        if user_ids.is_empty() {
            return Ok(Self::default());
        }

        let comment_digest_subscribers: Vec<(i64,)> = sqlx::query_as(
            "SELECT user_id FROM user_pref_kinds
             WHERE pref_kind = $1 AND user_id = ANY($2)",
        )
        .bind(ChangeKind::CommentNew.as_i16())
        .bind(&user_ids)
        .fetch_all(pool)
        .await?;

        let already_notified: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT user_id FROM notif_by_user
             WHERE change_log_id = $1 AND message_kind = 'text' AND user_id = ANY($2)",
        )
        .bind(event.change_log_id)
        .bind(&user_ids)
        .fetch_all(pool)
        .await?;

        let whitelist_users: Vec<(i64,)> = sqlx::query_as(
            "SELECT user_id FROM user_follow_modes
             WHERE whitelist_enabled AND user_id = ANY($1)",
        )
        .bind(&user_ids)
        .fetch_all(pool)
        .await?;

        let follow_rows: Vec<(i64, i64, String)> = sqlx::query_as(
            "SELECT user_id, topic_id, state FROM user_search_follows WHERE user_id = ANY($1)",
        )
        .bind(&user_ids)
        .fetch_all(pool)
        .await?;

        let mut follows: HashMap<i64, Vec<FollowRecord>> = HashMap::new();
        for (user_id, topic_id, state) in follow_rows {
            follows.entry(user_id).or_default().push(FollowRecord {
                topic_id,
                muted: state == "mute",
            });
        }

        Ok(Self {
            comment_digest_subscribers: comment_digest_subscribers
                .into_iter()
                .map(|(id,)| id)
                .collect(),
            already_notified: already_notified.into_iter().map(|(id,)| id).collect(),
            whitelist_users: whitelist_users.into_iter().map(|(id,)| id).collect(),
            follows,
        })
    }
}

/// Apply all five stages in order.
pub fn filter_subscribers(
    candidates: Vec<Subscriber>,
    event: &ChangeEvent,
    ctx: &FilterContext,
) -> Vec<Subscriber> {
    let initial = candidates.len();
    let survivors: Vec<Subscriber> = candidates
        .into_iter()
        .filter(|s| passes_double_count(s, event, ctx))
        .filter(|s| age_overlap(event.age_range, &s.age_ranges))
        .filter(|s| passes_radius(event.coords, &event.place_coords, s))
        .filter(|s| !ctx.already_notified.contains(&s.user_id))
        .filter(|s| passes_follow_state(s, event, ctx))
        .collect();
    debug!(
        change_log_id = event.change_log_id,
        initial,
        survivors = survivors.len(),
        "filter pipeline applied"
    );
    survivors
}

/// Stage 1: for inforg-comment events only, users already covered by the
/// general comment digest would get two messages for one underlying
/// event; drop them here.
fn passes_double_count(sub: &Subscriber, event: &ChangeEvent, ctx: &FilterContext) -> bool {
    if event.change_kind != Some(ChangeKind::InforgCommentNew) {
        return true;
    }
    !ctx.comment_digest_subscribers.contains(&sub.user_id)
}

/// Stage 2: inclusive integer overlap between the event's age range and
/// any of the user's saved ranges. Absence on either side is pass-through.
pub fn age_overlap(event_range: Option<(i32, i32)>, user_ranges: &[(i32, i32)]) -> bool {
    let Some((event_min, event_max)) = event_range else {
        return true;
    };
    if user_ranges.is_empty() {
        return true;
    }
    user_ranges
        .iter()
        .any(|&(min, max)| event_min <= max && min <= event_max)
}

/// Stage 3: geodesic radius. Radius preference is never a hard
/// requirement when location data is absent; over-notifying beats
/// silently dropping a user.
pub fn passes_radius(hq: Option<Coords>, places: &[Coords], sub: &Subscriber) -> bool {
    let (Some(radius), Some(home)) = (sub.radius_km, sub.home_coords) else {
        return true;
    };
    if let Some(hq) = hq {
        return distance_km(home, hq) <= radius;
    }
    if !places.is_empty() {
        return places.iter().any(|&p| distance_km(home, p) <= radius);
    }
    true
}

/// Stage 5: whitelist follow mode. Users without the mode bypass this
/// stage entirely.
fn passes_follow_state(sub: &Subscriber, event: &ChangeEvent, ctx: &FilterContext) -> bool {
    if !ctx.whitelist_users.contains(&sub.user_id) {
        return true;
    }
    let records = ctx
        .follows
        .get(&sub.user_id)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    follow_allows(records, event.topic_id)
}

/// A whitelist user receives the notification when this topic is
/// explicitly followed and not muted, or when every marker they hold is a
/// mute on some other topic, which makes this topic the implicit default.
pub fn follow_allows(records: &[FollowRecord], topic_id: i64) -> bool {
    if let Some(record) = records.iter().find(|r| r.topic_id == topic_id) {
        return !record.muted;
    }
    !records.is_empty() && records.iter().all(|r| r.muted)
}
