// Copyright 2026 Modbridge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Poll scheduler.
//!
//! One loop per platform, each on its own cadence. Loops share nothing but
//! the moderation lock held inside each tick, and stop on a shared
//! [`Notify`].

use crate::error::BridgeResult;
use crate::reconcile::TickReport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A unit of periodic reconciliation work.
#[async_trait]
pub trait ReconcileTask: Send + Sync {
    fn name(&self) -> &str;

    async fn tick(&self) -> BridgeResult<TickReport>;
}

/// Run `task` every `every` until `shutdown` fires. The first tick runs
/// immediately; a failed tick is logged and the loop carries on.
pub fn spawn(
    task: Arc<dyn ReconcileTask>,
    every: Duration,
    shutdown: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = task.name().to_string();
        tracing::info!("{name} sync loop started: tick={}s", every.as_secs());

        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stop = shutdown.notified();
        tokio::pin!(stop);
        stop.as_mut().enable();

        let mut tick_count: u64 = 0;
        loop {
            tokio::select! {
                _ = &mut stop => {
                    tracing::info!("{name} sync loop stopping after {tick_count} ticks");
                    break;
                }
                _ = ticker.tick() => {
                    tick_count = tick_count.saturating_add(1);
                    match task.tick().await {
                        Ok(report) if report.is_quiet() => {
                            tracing::debug!("{name} tick {tick_count}: no changes");
                        }
                        Ok(report) => tracing::info!("{name} tick {tick_count}: {report}"),
                        Err(e) if e.is_fatal() => {
                            tracing::error!("{name} tick {tick_count} failed: {e}");
                        }
                        Err(e) => tracing::warn!("{name} tick {tick_count} failed: {e}"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl ReconcileTask for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn tick(&self) -> BridgeResult<TickReport> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                Err(BridgeError::Upstream("queue page missing".into()))
            } else {
                Ok(TickReport::default())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failures_and_stops() {
        let task = Arc::new(Counting {
            ticks: AtomicUsize::new(0),
        });
        let shutdown = Arc::new(Notify::new());
        let handle = spawn(task.clone(), Duration::from_secs(10), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(35)).await;
        shutdown.notify_waiters();
        handle.await.unwrap();

        assert_eq!(task.ticks.load(Ordering::SeqCst), 4);
    }
}
