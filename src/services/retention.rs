use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::services::job_store::JobStore;

/// Periodically purge expired jobs and reap directories no job owns.
/// Abort the returned handle to stop the sweeper.
pub fn spawn_sweeper(store: Arc<JobStore>, ttl: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already swept.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep(&store, ttl).await;
        }
    })
}

/// One retention pass.
pub async fn sweep(store: &JobStore, ttl: Duration) {
    let purged = store.purge_expired(ttl).await;
    let reaped = match store.reap_orphans().await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(error = %e, "Failed to scan job storage for orphans");
            0
        }
    };

    if purged > 0 || reaped > 0 {
        tracing::info!(purged, reaped, "Retention sweep removed jobs");
    } else {
        tracing::trace!("Retention sweep found nothing to remove");
    }
}
