use std::time::Duration;

use leadsync_core::model::RunOutcome;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::AppState;

/// Shortest pause the scheduler accepts between batches.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Triggers a batch immediately and then every `interval` until `shutdown`
/// fires. Ticks that land while a run is in flight are dropped. Intervals
/// below [`MIN_INTERVAL`] are raised to it.
pub async fn run_scheduler(
    state: AppState,
    interval: Duration,
    shutdown: CancellationToken,
) {
    if interval < MIN_INTERVAL {
        warn!(
            requested = %humantime::format_duration(interval),
            "scheduler interval too short; using {}",
            humantime::format_duration(MIN_INTERVAL)
        );
    }
    let interval = interval.max(MIN_INTERVAL);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(
        interval = %humantime::format_duration(interval),
        "scheduler started"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match state.trigger().await {
            Ok(RunOutcome::Completed(_)) => {}
            Ok(RunOutcome::Skipped(_)) => {
                debug!("scheduled run skipped; previous run still active");
            }
            Err(err) if err.is_fatal() => {
                error!(error = %err, "scheduled run aborted before processing");
            }
            Err(err) => warn!(error = %err, "scheduled run failed"),
        }
    }

    info!("scheduler stopped");
}
