//! One notification cycle: guard, extract, compose, fan out, persist,
//! mark, continue.
//!
//! A cycle handles exactly one change-log event. Backlog draining happens
//! by republishing a continuation signal, bounding the blast radius of a
//! bad event to its own invocation.

use anyhow::Result;
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};

use crate::domains::changelog::extractor;
use crate::domains::compose::common::compose_common;
use crate::domains::mailing::maker::make_notifications;
use crate::domains::mailing::models::{bump_new_search_stat, force_mark_all_processed, mark_processed};
use crate::domains::subscribers::candidates::{build_candidates, pending_change_count};
use crate::domains::subscribers::filters::{filter_subscribers, FilterContext};

use super::guard::CycleGuard;
use super::queue::Outbound;

/// Default guard window; a second trigger inside it defers entirely.
pub const DEFAULT_GUARD_WINDOW_SECS: i64 = 30;

/// What a cycle did, for logging and tests.
#[derive(Debug, PartialEq, Eq)]
pub enum CycleReport {
    /// Another invocation holds the guard.
    Skipped,
    /// No pending change-log rows.
    Idle,
    /// One event processed (possibly with zero persisted rows).
    Completed {
        change_log_id: i64,
        persisted_rows: usize,
    },
}

/// Pure continuation decision over the count of pending rows.
pub fn should_continue(pending: i64) -> bool {
    pending > 0
}

/// Run one cycle. `explicit_id` pins the cycle to a specific change-log
/// row for diagnostics; normal operation passes `None`.
#[instrument(skip(pool, outbound))]
pub async fn run_cycle(
    pool: &PgPool,
    outbound: &Outbound,
    trigger_id: &str,
    explicit_id: Option<i64>,
) -> Result<CycleReport> {
    if !CycleGuard::try_acquire(pool, DEFAULT_GUARD_WINDOW_SECS).await? {
        info!(trigger_id, "another cycle is in flight, deferring");
        return Ok(CycleReport::Skipped);
    }

    let report = match process_one_event(pool, outbound, explicit_id).await {
        Ok(report) => report,
        Err(e) => {
            // Availability over completeness: sacrifice this cycle's
            // notifications so the queue cannot wedge on a bad event.
            error!(trigger_id, error = %e, "cycle failed, force-marking backlog");
            if let Err(mark_err) = force_mark_all_processed(pool).await {
                error!(error = %mark_err, "force-mark fallback failed");
            }
            outbound
                .admin_alert(
                    "cycle",
                    &format!("cycle failed, backlog force-marked: {}", e),
                )
                .await;
            CycleReport::Idle
        }
    };

    if let Err(e) = CycleGuard::release(pool).await {
        warn!(error = %e, "failed to release cycle guard");
    }

    // Continuation is decided over an explicit pending count, decoupled
    // from this invocation's own control flow.
    match pending_change_count(pool).await {
        Ok(pending) if should_continue(pending) => {
            info!(pending, "backlog remains, requesting continuation");
            if let Err(e) = outbound.request_continuation(trigger_id).await {
                warn!(error = %e, "failed to publish continuation signal");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "failed to count pending change-log rows"),
    }

    Ok(report)
}

async fn process_one_event(
    pool: &PgPool,
    outbound: &Outbound,
    explicit_id: Option<i64>,
) -> Result<CycleReport> {
    let Some(mut event) = extractor::next_pending(pool, explicit_id).await? else {
        return Ok(CycleReport::Idle);
    };
    let change_log_id = event.change_log_id;

    extractor::enrich(pool, outbound, &mut event).await;

    let mut persisted_rows = 0usize;
    if let Some(payload) = compose_common(&event) {
        let candidates = build_candidates(pool, &event).await?;
        let ctx = FilterContext::load(pool, &event, &candidates).await?;
        let survivors = filter_subscribers(candidates, &event, &ctx);

        let outcome = make_notifications(pool, &event, &payload, &survivors).await?;
        persisted_rows = outcome.persisted_rows;

        bump_new_search_stat(pool, &outcome.new_search_recipients).await?;

        if let Some(mailing_id) = outcome.mailing_id {
            if outcome.persisted_rows > 0 {
                outbound
                    .signal_delivery(mailing_id, outcome.persisted_rows)
                    .await?;
            }
        }
    }

    mark_processed(pool, &event).await?;

    info!(
        change_log_id,
        change_kind = event.change_kind_raw,
        topic_id = event.topic_id,
        ignore = event.ignore,
        persisted_rows,
        "event processed"
    );
    Ok(CycleReport::Completed {
        change_log_id,
        persisted_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_continue() {
        assert!(!should_continue(0));
        assert!(should_continue(1));
        assert!(should_continue(250));
        assert!(!should_continue(-1));
    }
}
