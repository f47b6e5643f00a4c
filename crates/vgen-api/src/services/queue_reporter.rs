//! Background service publishing queue counters.
//!
//! Every tick it:
//! - pushes a `queue_status` event to global stream subscribers
//! - refreshes the admission and render monitor gauges
//! - drops per-job channels nobody listens to any more

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use vgen_models::StreamEvent;
use vgen_worker::Scheduler;

/// Periodic queue status publisher.
pub struct QueueReporter {
    scheduler: Arc<Scheduler>,
    period: Duration,
}

impl QueueReporter {
    pub fn new(scheduler: Arc<Scheduler>, period: Duration) -> Self {
        Self {
            scheduler,
            period: period.max(Duration::from_millis(100)),
        }
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting queue reporter (interval: {:?})", self.period);
        let mut ticker = interval(self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.report_once().await {
                        warn!("Queue status report failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Queue reporter stopped");
    }

    /// Publish one report. Skips the event when nobody is listening.
    pub async fn report_once(&self) -> anyhow::Result<()> {
        let status = self.scheduler.queue_status().await?;
        let broadcaster = self.scheduler.broadcaster();

        let pruned = broadcaster.prune();
        if pruned > 0 {
            debug!("Dropped {} idle job channels", pruned);
        }
        if broadcaster.global_subscriber_count() > 0 {
            broadcaster.publish(StreamEvent::queue_status(status));
        }
        Ok(())
    }
}
