//! Mailing allocation, the durable notification ledger, and statistics.
//!
//! The ledger enforces the at-most-once invariant per
//! (user, message kind, change_log_id) with a unique index and
//! `ON CONFLICT DO NOTHING`; a retried cycle simply inserts zero rows.

use anyhow::Result;
use serde::Serialize;
use sqlx::PgPool;

use crate::domains::changelog::models::{ChangeEvent, ChangeKind};

/// Message kind persisted to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Coords,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Coords => "coords",
        }
    }
}

/// Allocate a mailing id grouping all per-user rows for this event.
pub async fn allocate_mailing(pool: &PgPool, event: &ChangeEvent) -> Result<i64> {
    let (mailing_id,): (i64,) = sqlx::query_as(
        "INSERT INTO notif_mailings (topic_id, change_kind, change_log_id)
         VALUES ($1, $2, $3)
         RETURNING mailing_id",
    )
    .bind(event.topic_id)
    .bind(event.change_kind_raw)
    .bind(event.change_log_id)
    .fetch_one(pool)
    .await?;
    Ok(mailing_id)
}

/// Structured delivery parameters stored next to the message text.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DeliveryParams {
    Text { parse_mode: &'static str },
    Location { lat: f64, lon: f64 },
}

/// Persist one outbound row; returns false on an idempotency hit.
#[allow(clippy::too_many_arguments)]
pub async fn persist_notification(
    pool: &PgPool,
    mailing_id: i64,
    user_id: i64,
    message_text: Option<&str>,
    message_plain: Option<&str>,
    kind: MessageKind,
    params: &DeliveryParams,
    group_id: Option<i64>,
    change_log_id: i64,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO notif_by_user
             (mailing_id, user_id, message_text, message_plain, message_kind,
              message_params, group_id, change_log_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (user_id, message_kind, change_log_id) DO NOTHING",
    )
    .bind(mailing_id)
    .bind(user_id)
    .bind(message_text)
    .bind(message_plain)
    .bind(kind.as_str())
    .bind(serde_json::to_value(params)?)
    .bind(group_id)
    .bind(change_log_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Allocate a group id linking a text row to its location row. One group
/// per event, not per user.
pub async fn next_group_id(pool: &PgPool) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as("SELECT nextval('notif_group_id_seq')")
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// Terminal marking for the change-log row and, for comment kinds, the
/// consumed comment rows. The comment markers are independent per channel
/// because the same comment can feed both the general digest and the
/// inforg notification.
pub async fn mark_processed(pool: &PgPool, event: &ChangeEvent) -> Result<()> {
    let marker = if event.ignore { "ignored" } else { "sent" };
    sqlx::query("UPDATE change_log SET processed = $1 WHERE id = $2")
        .bind(marker)
        .bind(event.change_log_id)
        .execute(pool)
        .await?;

    match event.change_kind {
        Some(ChangeKind::CommentNew) => {
            sqlx::query(
                "UPDATE comments SET notif_sent = 'y'
                 WHERE topic_id = $1 AND notif_sent IS NULL",
            )
            .bind(event.topic_id)
            .execute(pool)
            .await?;
        }
        Some(ChangeKind::InforgCommentNew) => {
            sqlx::query(
                "UPDATE comments SET notif_sent_inforg = 'y'
                 WHERE topic_id = $1 AND author_role = 'inforg' AND notif_sent_inforg IS NULL",
            )
            .bind(event.topic_id)
            .execute(pool)
            .await?;
        }
        _ => {}
    }
    Ok(())
}

/// Availability-over-completeness fallback: after a top-level failure,
/// force-mark every visible pending row so the queue cannot wedge on a
/// poisonous event. The sacrificed cycle is surfaced via the admin alert.
pub async fn force_mark_all_processed(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "UPDATE change_log SET processed = 'sent'
         WHERE processed IS NULL OR processed = 'selected'",
    )
    .execute(pool)
    .await?;
    sqlx::query("UPDATE comments SET notif_sent = 'y' WHERE notif_sent IS NULL")
        .execute(pool)
        .await?;
    sqlx::query(
        "UPDATE comments SET notif_sent_inforg = 'y'
         WHERE author_role = 'inforg' AND notif_sent_inforg IS NULL",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Increment the lifetime new-search counter for each recipient. The
/// recipient list is an explicit value handed over by the maker, never
/// module-level state.
pub async fn bump_new_search_stat(pool: &PgPool, user_ids: &[i64]) -> Result<()> {
    if user_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        "INSERT INTO user_stats (user_id, new_search_notifs)
         SELECT unnest($1::BIGINT[]), 1
         ON CONFLICT (user_id)
         DO UPDATE SET new_search_notifs = user_stats.new_search_notifs + 1",
    )
    .bind(user_ids)
    .execute(pool)
    .await?;
    Ok(())
}
