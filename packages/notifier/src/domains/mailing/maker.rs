//! Notification maker: turns a composed event plus the surviving
//! subscriber list into durable ledger rows.

use anyhow::Result;
use sqlx::PgPool;
use tracing::debug;

use crate::common::text::strip_html;
use crate::domains::changelog::models::{ChangeEvent, ChangeKind};
use crate::domains::compose::common::{location_coords, CommonPayload};
use crate::domains::compose::personal::compose_personal;
use crate::domains::subscribers::models::Subscriber;

use super::models::{
    allocate_mailing, next_group_id, persist_notification, DeliveryParams, MessageKind,
};

/// What one maker pass produced; the recipient list is returned to the
/// caller for the statistics step.
#[derive(Debug, Default)]
pub struct MailingOutcome {
    pub mailing_id: Option<i64>,
    pub persisted_rows: usize,
    /// Users who received a new-search notification this pass.
    pub new_search_recipients: Vec<i64>,
}

/// Persist one text row per surviving subscriber, plus a paired location
/// row for kinds that carry usable coordinates.
pub async fn make_notifications(
    pool: &PgPool,
    event: &ChangeEvent,
    payload: &CommonPayload,
    survivors: &[Subscriber],
) -> Result<MailingOutcome> {
    if survivors.is_empty() {
        return Ok(MailingOutcome::default());
    }

    let mailing_id = allocate_mailing(pool, event).await?;

    // group id is allocated once per event, only when a location row will
    // accompany the text
    let paired_coords = if event.change_kind.map(ChangeKind::pairs_location).unwrap_or(false) {
        location_coords(event, payload)
    } else {
        None
    };
    let group_id = match paired_coords {
        Some(_) => Some(next_group_id(pool).await?),
        None => None,
    };

    let mut outcome = MailingOutcome {
        mailing_id: Some(mailing_id),
        ..MailingOutcome::default()
    };

    for subscriber in survivors {
        let text = compose_personal(event, payload, subscriber);
        let plain = strip_html(&text);

        let text_inserted = persist_notification(
            pool,
            mailing_id,
            subscriber.user_id,
            Some(&text),
            Some(&plain),
            MessageKind::Text,
            &DeliveryParams::Text { parse_mode: "HTML" },
            group_id,
            event.change_log_id,
        )
        .await?;
        if text_inserted {
            outcome.persisted_rows += 1;
        } else {
            debug!(
                user_id = subscriber.user_id,
                change_log_id = event.change_log_id,
                "text ledger row already present"
            );
        }

        // The location insert runs even on a text conflict: a cycle that
        // died between the two inserts must not lose the location row on
        // retry.
        if let Some(coords) = paired_coords {
            let inserted = persist_notification(
                pool,
                mailing_id,
                subscriber.user_id,
                None,
                None,
                MessageKind::Coords,
                &DeliveryParams::Location {
                    lat: coords.lat,
                    lon: coords.lon,
                },
                group_id,
                event.change_log_id,
            )
            .await?;
            if inserted {
                outcome.persisted_rows += 1;
            }
        }

        if text_inserted && event.change_kind == Some(ChangeKind::NewTopic) {
            outcome.new_search_recipients.push(subscriber.user_id);
        }
    }

    debug!(
        mailing_id,
        rows = outcome.persisted_rows,
        recipients = survivors.len(),
        "mailing persisted"
    );
    Ok(outcome)
}
