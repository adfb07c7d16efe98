use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Shortest period a job may be scheduled with
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A unit of background work run on a fixed interval
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self);
}

/// Runs `job` every `every`, starting immediately.
///
/// Each run executes on its own task behind a non-blocking try-lock: a tick
/// that arrives while the previous run is still executing is skipped, so at
/// most one run is ever in flight.
pub fn spawn_periodic(
    job: Arc<dyn PeriodicJob>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = job.name();
        let in_flight = Arc::new(Mutex::new(()));
        let every = if every < MIN_PERIOD {
            tracing::warn!(job = name, requested_ms = every.as_millis() as u64, "Period too short, clamping");
            MIN_PERIOD
        } else {
            every
        };
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(job = name, every_secs = every.as_secs(), "Periodic job started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(job = name, "Periodic job received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    match in_flight.clone().try_lock_owned() {
                        Ok(permit) => {
                            let job = job.clone();
                            tokio::spawn(async move {
                                job.run().await;
                                drop(permit);
                            });
                        }
                        Err(_) => {
                            tracing::warn!(job = name, "Previous run still in progress, skipping tick");
                        }
                    }
                }
            }
        }

        // Let an in-flight run finish before reporting the job stopped
        let _ = in_flight.lock().await;
        tracing::info!(job = name, "Periodic job stopped");
    })
}
