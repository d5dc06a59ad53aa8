use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A named periodic job. One worker slot per name: the scheduler runs each
/// job in its own loop, so a slow run delays the next tick instead of
/// overlapping it.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    async fn run(&self, shutdown: &watch::Receiver<bool>) -> anyhow::Result<()>;
}

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fixed interval, first run immediate.
    Every(Duration),
    /// Wall-clock schedule (cron expression).
    Cron(Schedule),
}

impl Trigger {
    pub fn cron(expression: &str) -> anyhow::Result<Self> {
        Ok(Trigger::Cron(Schedule::from_str(expression)?))
    }
}

/// Sleep until a cron schedule's next fire time.
pub fn next_cron_delay(schedule: &Schedule, now: DateTime<Utc>) -> Duration {
    match schedule.after(&now).next() {
        Some(next) => (next - now).to_std().unwrap_or(Duration::from_secs(1)),
        // A schedule with no future firings (fully exhausted) re-checks hourly.
        None => Duration::from_secs(3600),
    }
}

pub struct Scheduler {
    jobs: Vec<(Arc<dyn Job>, Trigger)>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            jobs: Vec::new(),
            shutdown_tx,
        }
    }

    pub fn register(&mut self, job: Arc<dyn Job>, trigger: Trigger) {
        self.jobs.push((job, trigger));
    }

    /// Spawn one loop per job. Job-level failures are logged and the loop
    /// continues; only shutdown stops it.
    pub fn spawn_all(&self) -> Vec<JoinHandle<()>> {
        self.jobs
            .iter()
            .map(|(job, trigger)| {
                let job = Arc::clone(job);
                let trigger = trigger.clone();
                let mut shutdown_rx = self.shutdown_tx.subscribe();
                tokio::spawn(async move {
                    info!(job = job.name(), "Job loop started");
                    loop {
                        match &trigger {
                            // Interval jobs fire immediately, then pace.
                            Trigger::Every(interval) => {
                                if *shutdown_rx.borrow() {
                                    break;
                                }
                                if let Err(e) = job.run(&shutdown_rx).await {
                                    error!(job = job.name(), error = %e, "Job run failed");
                                }
                                tokio::select! {
                                    _ = tokio::time::sleep(*interval) => {}
                                    _ = shutdown_rx.changed() => {}
                                }
                            }
                            // Wall-clock jobs wait for their next fire time.
                            Trigger::Cron(schedule) => {
                                let wait = next_cron_delay(schedule, Utc::now());
                                tokio::select! {
                                    _ = tokio::time::sleep(wait) => {}
                                    _ = shutdown_rx.changed() => {}
                                }
                                if *shutdown_rx.borrow() {
                                    break;
                                }
                                if let Err(e) = job.run(&shutdown_rx).await {
                                    error!(job = job.name(), error = %e, "Job run failed");
                                }
                            }
                        }
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    info!(job = job.name(), "Job loop stopped");
                })
            })
            .collect()
    }

    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn cron_next_delay_daily_schedule() {
        // Daily at 08:00:00 UTC.
        let schedule = Schedule::from_str("0 0 8 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap();
        let delay = next_cron_delay(&schedule, now);
        assert_eq!(delay, Duration::from_secs(3600));

        // Just past 08:00 rolls to tomorrow.
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 1).unwrap();
        let delay = next_cron_delay(&schedule, now);
        assert_eq!(delay, Duration::from_secs(24 * 3600 - 1));
    }

    #[test]
    fn cron_trigger_rejects_garbage() {
        assert!(Trigger::cron("not a schedule").is_err());
        assert!(Trigger::cron("0 0 8,17 * * *").is_ok());
    }

    struct CountingJob {
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }
        async fn run(&self, _shutdown: &watch::Receiver<bool>) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn interval_job_runs_immediately_and_stops_on_shutdown() {
        let runs = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.register(
            Arc::new(CountingJob { runs: Arc::clone(&runs) }),
            Trigger::Every(Duration::from_secs(3600)),
        );
        let handles = scheduler.spawn_all();

        // First run fires without waiting out the hour.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        scheduler.shutdown_handle().send(true).ok();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
