//! Advisory single-flight guard for notification cycles.
//!
//! The guard is time-windowed, not a hard lock: a second invocation inside
//! the window defers entirely; outside the window it proceeds, and
//! correctness falls back on the ledger's idempotency.

use anyhow::Result;
use sqlx::PgPool;

pub struct CycleGuard;

impl CycleGuard {
    /// Try to register this invocation. Returns false when another cycle
    /// started within the window and has not finished.
    pub async fn try_acquire(pool: &PgPool, window_secs: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE cycle_guard
             SET started_at = NOW(), finished_at = NULL
             WHERE id = 1
               AND (started_at IS NULL
                    OR finished_at IS NOT NULL
                    OR started_at < NOW() - ($1 || ' seconds')::INTERVAL)",
        )
        .bind(window_secs.to_string())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark this invocation finished so the next trigger can start
    /// immediately.
    pub async fn release(pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE cycle_guard SET finished_at = NOW() WHERE id = 1")
            .execute(pool)
            .await?;
        Ok(())
    }
}
