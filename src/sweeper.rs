// Periodic housekeeping: mark stale pending matches as expired.
//
// Reads and writes apply expiry lazily, so the sweep only keeps stored statuses
// tidy for listings and admin stats.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::db::Database;
use crate::metrics;

/// Expire every stale pending match once. Returns how many were expired.
pub async fn sweep_once(db: &Database) -> Result<u64, sqlx::Error> {
    let expired = db.expire_stale_matches(Utc::now()).await?;
    if expired > 0 {
        metrics::MATCHES_EXPIRED_TOTAL.inc_by(expired);
        tracing::info!(expired, "Expiry sweep marked matches expired");
    }
    Ok(expired)
}

/// Run [`sweep_once`] every `interval` in a background task.
pub fn spawn_expiry_sweeper(db: Arc<Database>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            if let Err(e) = sweep_once(&db).await {
                tracing::error!("Expiry sweep failed: {e}");
            }
        }
    })
}
