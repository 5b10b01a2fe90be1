//! Optional housekeeping sweep for expired blocks.
//!
//! Correctness never depends on this task: every block read filters on
//! `expires_at > NOW()`. The sweep only keeps the registry small.

use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, error};

/// Spawn the periodic sweep. `every` of zero disables it.
pub fn spawn_cleanup_task(pool: PgPool, every: Duration) {
    if every.is_zero() {
        debug!("Block cleanup task disabled");
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = sweep_expired(&pool).await {
                error!("Block cleanup sweep failed: {err:#}");
            }
        }
    });
}

pub(crate) async fn sweep_expired(pool: &PgPool) -> anyhow::Result<()> {
    let deleted = sqlx::query("DELETE FROM blocked_origins WHERE expires_at <= NOW()")
        .execute(pool)
        .await?
        .rows_affected();

    let cleared = sqlx::query(
        r"
        UPDATE users
        SET blocked_until = NULL, block_reason = NULL, updated_at = NOW()
        WHERE blocked_until IS NOT NULL AND blocked_until <= NOW()
        ",
    )
    .execute(pool)
    .await?
    .rows_affected();

    if deleted > 0 || cleared > 0 {
        debug!("Cleanup removed {deleted} origin blocks, cleared {cleared} principal blocks");
    }
    Ok(())
}
