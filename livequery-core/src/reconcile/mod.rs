//! Anti-entropy sweep between the store and the system of record
//!
//! Explicit stops can be lost (an operator's request dies mid-flight, a
//! replica crashes). The reconciler periodically evicts every campaign the
//! system of record no longer lists. The store's cleanup watermark is taken
//! before the snapshot is fetched, so a campaign started while the snapshot
//! is in flight survives until the next pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{LiveQueryError, LiveQueryResult};
use crate::source::ActiveCampaignSource;
use crate::store::{CleanupReport, LiveQueryStore};

/// Scheduling knobs for [`Reconciler::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerSettings {
    /// Time between the starts of consecutive passes.
    pub interval: Duration,
    /// Delay before the first retry of a failed pass.
    pub retry_base: Duration,
    /// Cap on the retry delay.
    pub retry_max: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            retry_base: Duration::from_secs(5),
            retry_max: Duration::from_secs(300),
        }
    }
}

/// Helper functions for calculating retry delays
pub mod backoff {
    use std::time::Duration;

    /// Calculate exponential backoff duration
    pub fn exponential(base: Duration, failures: u32, max: Duration) -> Duration {
        let multiplier = 2_u32.saturating_pow(failures.saturating_sub(1));
        let backoff = base.saturating_mul(multiplier);
        backoff.min(max)
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    store: Arc<dyn LiveQueryStore>,
    source: Arc<dyn ActiveCampaignSource>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn LiveQueryStore>,
        source: Arc<dyn ActiveCampaignSource>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            source,
            settings,
        }
    }

    pub fn settings(&self) -> ReconcilerSettings {
        self.settings
    }

    /// One sweep: watermark, then snapshot, then evict.
    pub async fn run_pass(
        &self,
        cancel: &CancellationToken,
    ) -> LiveQueryResult<CleanupReport> {
        let watermark = self.store.cleanup_watermark().await?;
        let active = self.source.active_campaign_ids().await?;
        debug!(
            watermark = watermark.0,
            active = active.len(),
            "starting live query cleanup pass"
        );

        let report = self
            .store
            .cleanup_inactive_before(cancel, &active, watermark)
            .await?;

        if report.evicted.is_empty() {
            debug!(examined = report.examined, "cleanup pass found nothing to evict");
        } else {
            info!(
                examined = report.examined,
                evicted = report.evicted.len(),
                retained = report.retained,
                skipped_recent = report.skipped_recent,
                "cleanup pass evicted abandoned campaigns"
            );
        }
        Ok(report)
    }

    /// Run passes until `cancel` fires. Failed passes are retried with
    /// exponential backoff; the regular interval resumes after a success.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures: u32 = 0;

        info!(interval = ?self.settings.interval, "live query reconciler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            loop {
                match self.run_pass(&cancel).await {
                    Ok(_) => {
                        failures = 0;
                        break;
                    }
                    Err(LiveQueryError::Cancelled { evicted }) => {
                        info!(evicted, "cleanup pass cancelled");
                        return;
                    }
                    Err(err) => {
                        failures = failures.saturating_add(1);
                        let delay = backoff::exponential(
                            self.settings.retry_base,
                            failures,
                            self.settings.retry_max,
                        );
                        warn!(
                            error = %err,
                            failures,
                            retry_in = ?delay,
                            "cleanup pass failed"
                        );

                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        info!("live query reconciler stopped");
    }
}
