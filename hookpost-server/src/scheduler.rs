//! The dispatch loop.
//!
//! Every tick runs one `process_pending_events_until` batch with whatever
//! runtime is current, then sleeps for the interval plus a random jitter.

use crate::state::DeliveryRuntime;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

pub struct Scheduler {
    runtime_rx: watch::Receiver<Arc<DeliveryRuntime>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        runtime_rx: watch::Receiver<Arc<DeliveryRuntime>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            runtime_rx,
            shutdown_rx,
        }
    }

    /// Run until shutdown. A batch in flight when shutdown arrives hands its
    /// claims back before this returns.
    pub async fn run(mut self) {
        info!("Scheduler started");

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let runtime = self.runtime_rx.borrow_and_update().clone();
            match runtime
                .dispatcher
                .process_pending_events_until(runtime.schedule.batch_size, self.shutdown_rx.clone())
                .await
            {
                Ok(report) if report.due > 0 => {
                    info!(
                        claimed = report.claimed,
                        delivered = report.delivered,
                        retrying = report.retrying,
                        failed = report.failed,
                        "Dispatch tick finished"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Dispatch tick failed");
                }
            }

            let delay = next_delay(runtime.schedule.interval, runtime.schedule.jitter);
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Scheduler received shutdown signal");
                        break;
                    }
                }

                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Scheduler shutdown complete");
    }
}

/// `interval` plus a uniformly random extra delay of at most `jitter`.
fn next_delay(interval: Duration, jitter: Duration) -> Duration {
    let jitter_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
    if jitter_ms == 0 {
        return interval;
    }
    interval + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
}
