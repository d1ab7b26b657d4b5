//! Background expiry sweep.
//!
//! One task per manager calls `Provider::gc` on a fixed interval. A failing
//! or panicking sweep is logged at `error`, flags the manager as degraded and
//! ends the loop; it is not retried.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::MAX_DURATION_SECS;
use crate::providers::Provider;

const MIN_PERIOD: Duration = Duration::from_millis(1);
const MAX_PERIOD: Duration = Duration::from_secs(MAX_DURATION_SECS.unsigned_abs());

/// Handle to a running sweep. Dropping it stops the loop at its next wake-up.
pub struct SweepTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweepTask {
    /// Start sweeping `provider` every `period`. The first sweep runs one
    /// full period after start.
    pub fn spawn(provider: Arc<dyn Provider>, period: Duration, degraded: Arc<AtomicBool>) -> Self {
        let period = period.clamp(MIN_PERIOD, MAX_PERIOD);
        let (stop, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let name = provider.name().to_string();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(provider = %name, period_ms = period.as_millis(), "Session sweep started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => {
                        tracing::debug!(provider = %name, "Session sweep stopped");
                        break;
                    }
                }

                match AssertUnwindSafe(provider.gc()).catch_unwind().await {
                    Ok(Ok(removed)) => {
                        if removed > 0 {
                            tracing::debug!(provider = %name, removed, "Swept expired sessions");
                        }
                    }
                    Ok(Err(e)) => {
                        degraded.store(true, Ordering::SeqCst);
                        tracing::error!(
                            provider = %name,
                            "Session sweep failed, expired sessions will no longer be removed: {e:#}"
                        );
                        break;
                    }
                    Err(panic) => {
                        degraded.store(true, Ordering::SeqCst);
                        tracing::error!(
                            provider = %name,
                            "Session sweep crashed, expired sessions will no longer be removed: {}",
                            panic_message(panic.as_ref())
                        );
                        break;
                    }
                }
            }
        });

        Self { stop, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the loop and wait for it to exit. An in-progress `gc()` is
    /// allowed to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
