//! Change-log extraction and enrichment.
//!
//! `next_pending` selects the single oldest unprocessed change-log row;
//! `enrich` joins it with the current topic state and applies the
//! suppression rules. Every enrichment step is independently
//! fault-tolerant: a failed join is logged and the field stays at its
//! default, the cycle itself never aborts here.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use crate::common::geo::Coords;
use crate::kernel::queue::Outbound;

use super::models::{
    is_terminal_status, topic_type_emoji, ChangeEvent, ChangeKind, Comment, TopicType,
};

/// Topics older than this are not announced unless their folder is exempt.
pub const STALE_WINDOW_DAYS: i64 = 60;

/// New topics are only announced while fresh.
pub const NEW_TOPIC_FRESH_DAYS: i64 = 2;

/// Archive folders where stale topics are still legitimate.
pub const STALE_WINDOW_EXEMPT_FOLDERS: [i64; 2] = [276, 41];

const FORUM_TOPIC_URL: &str = "https://lizaalert.org/forum/viewtopic.php?t=";

/// Select the single oldest pending change-log row (or an explicit row for
/// diagnostics) and mark it transiently selected.
///
/// Returns `None` when no pending rows exist; the caller stops the cycle.
pub async fn next_pending(pool: &PgPool, explicit_id: Option<i64>) -> Result<Option<ChangeEvent>> {
    let row = match explicit_id {
        Some(id) => {
            sqlx::query(
                "SELECT id, topic_id, change_kind, new_value FROM change_log
                 WHERE id = $1 AND (processed IS NULL OR processed = 'selected')",
            )
            .bind(id)
            .fetch_optional(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT id, topic_id, change_kind, new_value FROM change_log
                 WHERE processed IS NULL OR processed = 'selected'
                 ORDER BY id
                 LIMIT 1",
            )
            .fetch_optional(pool)
            .await?
        }
    };

    let Some(row) = row else {
        return Ok(None);
    };

    let change_log_id: i64 = row.get("id");
    let change_kind_raw: i16 = row.get("change_kind");

    sqlx::query("UPDATE change_log SET processed = 'selected' WHERE id = $1")
        .bind(change_log_id)
        .execute(pool)
        .await?;

    let mut event = ChangeEvent {
        change_log_id,
        topic_id: row.get("topic_id"),
        change_kind_raw,
        new_value: row.get("new_value"),
        ..ChangeEvent::default()
    };

    match ChangeKind::try_from(change_kind_raw) {
        Ok(kind) => event.change_kind = Some(kind),
        Err(e) => {
            warn!(change_log_id, error = %e, "event will be ignored");
            event.ignore = true;
        }
    }

    Ok(Some(event))
}

/// Run all enrichment steps in order.
pub async fn enrich(pool: &PgPool, outbound: &Outbound, event: &mut ChangeEvent) {
    if let Err(e) = cleanup_follow_marks(pool, event).await {
        warn!(change_log_id = event.change_log_id, error = %e, "follow-mark cleanup failed");
    }
    if let Err(e) = join_topic_core(pool, event).await {
        warn!(change_log_id = event.change_log_id, error = %e, "topic join failed");
    }
    if let Err(e) = join_collections(pool, event).await {
        warn!(change_log_id = event.change_log_id, error = %e, "collections join failed");
    }
    apply_suppression(event, outbound).await;
    compute_display_attributes(event);
}

/// Step 1: once a topic reaches a terminal status, per-user follow/mute
/// markers for it no longer apply.
async fn cleanup_follow_marks(pool: &PgPool, event: &ChangeEvent) -> Result<()> {
    if event.change_kind != Some(ChangeKind::StatusChange) {
        return Ok(());
    }
    let new_status = event.new_value.as_deref().unwrap_or("");
    if !is_terminal_status(new_status) {
        return Ok(());
    }

    let deleted = sqlx::query("DELETE FROM user_search_follows WHERE topic_id = $1")
        .bind(event.topic_id)
        .execute(pool)
        .await?
        .rows_affected();
    if deleted > 0 {
        info!(
            topic_id = event.topic_id,
            deleted, "cleared follow marks for concluded topic"
        );
    }
    Ok(())
}

/// Step 2: join current topic attributes. A missing topic row is an
/// upstream inconsistency; it is surfaced in the log and the event stays
/// empty rather than fabricated.
async fn join_topic_core(pool: &PgPool, event: &mut ChangeEvent) -> Result<()> {
    let row = sqlx::query(
        "SELECT forum_folder_id, region_name, topic_type_id, status, title, display_name,
                family_name, age, age_min, age_max, latitude, longitude,
                search_start_time
         FROM searches
         WHERE topic_id = $1",
    )
    .bind(event.topic_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        warn!(
            topic_id = event.topic_id,
            change_log_id = event.change_log_id,
            "change-log row references a missing topic"
        );
        return Ok(());
    };

    event.forum_folder_id = Some(row.get("forum_folder_id"));
    event.region_name = row.get("region_name");
    event.topic_type = TopicType::from_i16(row.get::<i16, _>("topic_type_id"));
    event.status = row.get("status");
    event.title = row.get("title");
    event.display_name = row.get("display_name");
    event.family_name = row.get("family_name");
    event.age = row.get("age");
    if let (Some(min), Some(max)) = (row.get::<Option<i32>, _>("age_min"), row.get("age_max")) {
        event.age_range = Some((min, max));
    }
    if let (Some(lat), Some(lon)) = (
        row.get::<Option<f64>, _>("latitude"),
        row.get::<Option<f64>, _>("longitude"),
    ) {
        event.coords = Some(Coords::new(lat, lon));
    }
    event.start_time = row.get("search_start_time");
    Ok(())
}

/// Step 3: ongoing field activities, manager list, approximate places,
/// and the pending comment sets.
async fn join_collections(pool: &PgPool, event: &mut ChangeEvent) -> Result<()> {
    let activities: Vec<(String,)> = sqlx::query_as(
        "SELECT activity FROM search_activities WHERE topic_id = $1 AND ongoing ORDER BY id",
    )
    .bind(event.topic_id)
    .fetch_all(pool)
    .await?;
    event.activities = activities.into_iter().map(|(a,)| a).collect();

    if let Some((raw,)) =
        sqlx::query_as::<_, (Option<String>,)>("SELECT managers FROM search_managers WHERE topic_id = $1")
            .bind(event.topic_id)
            .fetch_optional(pool)
            .await?
    {
        event.managers = parse_managers(raw.as_deref().unwrap_or(""), event.topic_id);
    }

    let places: Vec<(f64, f64)> =
        sqlx::query_as("SELECT latitude, longitude FROM search_places WHERE topic_id = $1")
            .bind(event.topic_id)
            .fetch_all(pool)
            .await?;
    event.place_coords = places
        .into_iter()
        .map(|(lat, lon)| Coords::new(lat, lon))
        .collect();

    match event.change_kind {
        Some(ChangeKind::CommentNew) => {
            event.comments = sqlx::query_as::<_, Comment>(
                "SELECT id, author_nickname, author_role, comment_text
                 FROM comments
                 WHERE topic_id = $1 AND notif_sent IS NULL
                 ORDER BY id",
            )
            .bind(event.topic_id)
            .fetch_all(pool)
            .await?;
        }
        Some(ChangeKind::InforgCommentNew) => {
            event.inforg_comments = sqlx::query_as::<_, Comment>(
                "SELECT id, author_nickname, author_role, comment_text
                 FROM comments
                 WHERE topic_id = $1 AND author_role = 'inforg' AND notif_sent_inforg IS NULL
                 ORDER BY id",
            )
            .bind(event.topic_id)
            .fetch_all(pool)
            .await?;
        }
        _ => {}
    }
    Ok(())
}

/// The manager column is a strict JSON array of display strings. Anything
/// else is logged and read as empty.
fn parse_managers(raw: &str, topic_id: i64) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(managers) => managers,
        Err(e) => {
            warn!(topic_id, error = %e, "manager list is not a JSON array");
            Vec::new()
        }
    }
}

/// New topics are only announced while fresh.
pub fn is_stale_new_topic(start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - start > Duration::days(NEW_TOPIC_FRESH_DAYS)
}

/// Topics started outside the notification window are not announced at
/// all unless their folder is exempt.
pub fn is_outside_notification_window(
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    folder_id: Option<i64>,
) -> bool {
    let exempt = folder_id
        .map(|f| STALE_WINDOW_EXEMPT_FOLDERS.contains(&f))
        .unwrap_or(false);
    !exempt && now - start > Duration::days(STALE_WINDOW_DAYS)
}

/// Step 4: suppression rules.
async fn apply_suppression(event: &mut ChangeEvent, outbound: &Outbound) {
    let kind = event.change_kind;
    let now = Utc::now();
    let announces_topic = matches!(
        kind,
        Some(ChangeKind::NewTopic) | Some(ChangeKind::FirstPostChange)
    );

    if announces_topic {
        if let Some(status) = event.status.as_deref() {
            if status != super::models::STATUS_SEARCHING {
                event.ignore = true;
            }
        }
    }

    if kind == Some(ChangeKind::NewTopic) {
        if let Some(start) = event.start_time {
            if is_stale_new_topic(start, now) {
                event.ignore = true;
            }
        }
    }

    // A change to a topic far outside the notification window means the
    // scraper picked up something it should not have; surface it.
    if let Some(start) = event.start_time {
        if is_outside_notification_window(start, now, event.forum_folder_id) {
            event.ignore = true;
            outbound
                .admin_alert(
                    "extractor",
                    &format!(
                        "change_log {} touches stale topic {} (folder {:?}, started {})",
                        event.change_log_id, event.topic_id, event.forum_folder_id, start
                    ),
                )
                .await;
        }
    }
}

/// Step 5: rendering-ready name and emoji tag.
fn compute_display_attributes(event: &mut ChangeEvent) {
    event.topic_emoji = topic_type_emoji(event.topic_type);
    event.clickable_name = clickable_name(event);
}

/// Prefer the curated display name, fall back to family name plus age
/// wording, fall back to a generic placeholder.
fn clickable_name(event: &ChangeEvent) -> String {
    let name = match (
        event.display_name.as_deref(),
        event.family_name.as_deref(),
        event.age,
    ) {
        (Some(display), _, _) if !display.trim().is_empty() => display.trim().to_string(),
        (_, Some(family), Some(age)) if !family.trim().is_empty() => {
            format!("{} {}", family.trim(), age_wording(age))
        }
        (_, Some(family), None) if !family.trim().is_empty() => family.trim().to_string(),
        _ => "Пропавший человек".to_string(),
    };
    format!(
        "<a href=\"{}{}\">{}</a>",
        FORUM_TOPIC_URL, event.topic_id, name
    )
}

/// Russian plural form for an age in years.
pub fn age_wording(age: i32) -> String {
    let last_two = age % 100;
    let last = age % 10;
    let word = if (11..=14).contains(&last_two) {
        "лет"
    } else {
        match last {
            1 => "год",
            2..=4 => "года",
            _ => "лет",
        }
    };
    format!("{} {}", age, word)
}
