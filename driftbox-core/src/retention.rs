use crate::{
    Result, SweepExpiredOperation, SweepExpiredOperationOutcome, SweepExpiredOperationRequest,
};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// 14 days.
pub const DEFAULT_RETENTION_WINDOW: Duration = Duration::from_secs(14 * 24 * 60 * 60);
/// 12 hours.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub window: Duration,
}

impl RetentionPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// A record expires once strictly more than `window` has passed since upload.
    pub fn is_expired(&self, uploaded_at: i64, now: i64) -> bool {
        let window = i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(uploaded_at) > window
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_WINDOW)
    }
}

/// Runs [`SweepExpiredOperation`] on a fixed period until told to stop.
pub struct RetentionSweeper {
    operation: SweepExpiredOperation,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(operation: SweepExpiredOperation, interval: Duration) -> Self {
        Self {
            operation,
            interval,
        }
    }

    /// One sweep against the current wall clock.
    pub async fn sweep_now(&self) -> Result<SweepExpiredOperationOutcome> {
        let now = Utc::now().timestamp();
        let outcome = self
            .operation
            .run(SweepExpiredOperationRequest { now })
            .await?;

        match &outcome {
            SweepExpiredOperationOutcome::Unchanged => {
                tracing::debug!("retention sweep found nothing expired");
            }
            SweepExpiredOperationOutcome::Reclaimed(result) => {
                tracing::info!(
                    removed = result.removed.len(),
                    retained = result.retained.len(),
                    "retention sweep reclaimed expired files"
                );
            }
        }

        Ok(outcome)
    }

    /// Spawn the periodic loop. The first tick fires one full interval after
    /// spawning; call [`sweep_now`](Self::sweep_now) beforehand to cover
    /// startup. The task exits when `shutdown` flips to `true` or its sender
    /// is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let first_tick = Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(first_tick, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval_secs = self.interval.as_secs(), "retention sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(error) = self.sweep_now().await {
                            tracing::error!(
                                error = %error,
                                "retention sweep failed, table left unchanged"
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("retention sweeper stopped");
        })
    }
}
