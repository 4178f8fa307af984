//! Initial candidate recipient set.
//!
//! One preference join builds the candidate list; enrichment queries then
//! add age ranges and radius. Enrichment only adds data, it never filters.

use anyhow::Result;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::common::geo::Coords;
use crate::domains::changelog::models::{ChangeEvent, PREF_KIND_ALL, PREF_TOPIC_TYPE_ANY};

use super::models::Subscriber;

/// Build the candidate set for an event.
///
/// A user becomes a candidate only if they are unblocked, subscribed to
/// this event's region, their kind preferences include "all" or this
/// change kind, and their topic-type preferences include "any" or this
/// event's topic type. For inforg-comment events the kind match checks
/// {all, inforg} only; a title-change preference neither includes nor
/// excludes (the documented carve-out).
pub async fn build_candidates(pool: &PgPool, event: &ChangeEvent) -> Result<Vec<Subscriber>> {
    let Some(kind) = event.change_kind else {
        return Ok(Vec::new());
    };
    let Some(folder_id) = event.forum_folder_id else {
        debug!(
            change_log_id = event.change_log_id,
            "no folder on event, candidate set is empty"
        );
        return Ok(Vec::new());
    };
    let topic_type_id = event.topic_type.map(|t| t.as_i16()).unwrap_or(-1);

    let rows = sqlx::query(
        "SELECT u.user_id,
                u.username,
                u.role,
                uc.latitude,
                uc.longitude,
                BOOL_OR(uk.pref_kind = $3) AS all_kinds,
                (SELECT COUNT(*) FROM user_pref_regions r WHERE r.user_id = u.user_id) > 1
                    AS multi_region,
                COALESCE(us.new_search_notifs, 0) AS new_search_count
         FROM users u
         JOIN user_pref_regions ur
           ON ur.user_id = u.user_id AND ur.forum_folder_id = $1
         JOIN user_pref_kinds uk
           ON uk.user_id = u.user_id AND uk.pref_kind IN ($2, $3)
         JOIN user_pref_topic_types ut
           ON ut.user_id = u.user_id AND ut.topic_type_id IN ($4, $5)
         LEFT JOIN user_coordinates uc ON uc.user_id = u.user_id
         LEFT JOIN user_stats us ON us.user_id = u.user_id
         WHERE u.status IS DISTINCT FROM 'blocked'
         GROUP BY u.user_id, u.username, u.role, uc.latitude, uc.longitude,
                  us.new_search_notifs
         ORDER BY u.user_id",
    )
    .bind(folder_id)
    .bind(kind.as_i16())
    .bind(PREF_KIND_ALL)
    .bind(topic_type_id)
    .bind(PREF_TOPIC_TYPE_ANY)
    .fetch_all(pool)
    .await?;

    let mut candidates = Vec::with_capacity(rows.len());
    for row in rows {
        let home_coords = match (
            row.get::<Option<f64>, _>("latitude"),
            row.get::<Option<f64>, _>("longitude"),
        ) {
            (Some(lat), Some(lon)) => Some(Coords::new(lat, lon)),
            _ => None,
        };
        candidates.push(Subscriber {
            user_id: row.get("user_id"),
            username: row.get("username"),
            role: row.get("role"),
            home_coords,
            all_kinds: row.get::<Option<bool>, _>("all_kinds").unwrap_or(false),
            multi_region: row.get::<Option<bool>, _>("multi_region").unwrap_or(false),
            new_search_count: row.get("new_search_count"),
            age_ranges: Vec::new(),
            radius_km: None,
        });
    }

    enrich_candidates(pool, &mut candidates).await?;

    debug!(
        change_log_id = event.change_log_id,
        kind = ?kind,
        count = candidates.len(),
        "built candidate set"
    );
    Ok(candidates)
}

/// Pure addition: saved age ranges and radius per candidate.
async fn enrich_candidates(pool: &PgPool, candidates: &mut [Subscriber]) -> Result<()> {
    for candidate in candidates.iter_mut() {
        let ranges: Vec<(i32, i32)> =
            sqlx::query_as("SELECT age_min, age_max FROM user_pref_ages WHERE user_id = $1")
                .bind(candidate.user_id)
                .fetch_all(pool)
                .await?;
        candidate.age_ranges = ranges;

        let radius: Option<(f64,)> =
            sqlx::query_as("SELECT radius_km FROM user_pref_radius WHERE user_id = $1")
                .bind(candidate.user_id)
                .fetch_optional(pool)
                .await?;
        candidate.radius_km = radius.map(|(r,)| r.round());
    }
    Ok(())
}

/// Count of change-log rows still pending after this cycle; feeds the
/// continuation decision.
pub async fn pending_change_count(pool: &PgPool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM change_log WHERE processed IS NULL OR processed = 'selected'",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}
