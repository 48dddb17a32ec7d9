//! Cron-style trigger for periodic full syncs

use crate::error::MirrorError;
use chrono::{DateTime, Local};
use cron::Schedule;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Parse a cron expression.
///
/// Five-field crontab expressions (`min hour dom month dow`) get an implied
/// `0` seconds field; six and seven field expressions are passed through.
pub fn parse_schedule(expr: &str) -> Result<Schedule, MirrorError> {
    let expr = expr.trim();
    let fields = expr.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {}", expr),
        6 | 7 => expr.to_string(),
        _ => {
            return Err(MirrorError::configuration(format!(
                "cron expression '{}' must have 5 to 7 fields, found {}",
                expr, fields
            )))
        }
    };

    Schedule::from_str(&normalized).map_err(|e| {
        MirrorError::configuration(format!("cron expression '{}' is invalid: {}", expr, e))
    })
}

/// Next firing time strictly after `after`
pub fn next_run(schedule: &Schedule, after: DateTime<Local>) -> Option<DateTime<Local>> {
    schedule.after(&after).next()
}

/// Cancellation signal handed to a running job.
///
/// Long jobs such as a full sync check it between units of work so a
/// cancelled job returns without finishing the whole run.
#[derive(Debug, Clone)]
pub struct Cancellation(watch::Receiver<bool>);

impl Cancellation {
    /// Resolves once the owning job is cancelled or dropped
    pub async fn cancelled(mut self) {
        let _ = self.0.wait_for(|stop| *stop).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// A background job that runs a task at each scheduled time until cancelled
pub struct ScheduledJob {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ScheduledJob {
    /// Run `job` at every upcoming time of `schedule`.
    ///
    /// A run that is still in progress when the next time arrives delays it;
    /// runs never overlap.
    pub fn spawn<F, Fut>(name: &str, schedule: Schedule, job: F) -> Self
    where
        F: Fn(Cancellation) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let cancel = Cancellation(shutdown_rx);
        let name = name.to_string();

        let task = tokio::spawn(async move {
            while !cancel.is_cancelled() {
                let now = Local::now();
                let Some(next) = next_run(&schedule, now) else {
                    info!("Schedule '{}' has no upcoming runs, stopping", name);
                    break;
                };
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                debug!("Next '{}' run at {}", name, next.format("%Y-%m-%d %H:%M:%S"));

                tokio::select! {
                    _ = cancel.clone().cancelled() => break,
                    _ = tokio::time::sleep(wait) => {
                        info!("Running scheduled '{}'", name);
                        job(cancel.clone()).await;
                    }
                }
            }
        });

        Self { shutdown, task }
    }

    /// Run `job` once after `delay`
    pub fn once<F, Fut>(name: &str, delay: Duration, job: F) -> Self
    where
        F: FnOnce(Cancellation) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let cancel = Cancellation(shutdown_rx);
        let name = name.to_string();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.clone().cancelled() => debug!("One-shot '{}' cancelled", name),
                _ = tokio::time::sleep(delay) => {
                    info!("Running one-shot '{}'", name);
                    job(cancel).await;
                }
            }
        });

        Self { shutdown, task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the job and wait for it to wind down.
    ///
    /// A pending run never starts. A running job sees its [`Cancellation`]
    /// fire and is awaited until it returns.
    pub async fn cancel(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Scheduled job ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Timelike};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_five_field_crontab() {
        let schedule = parse_schedule("30 3 * * *").unwrap();
        let after = Local.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let next = next_run(&schedule, after).unwrap();
        assert_eq!((next.hour(), next.minute(), next.second()), (3, 30, 0));
        assert!(next > after);
    }

    #[test]
    fn test_six_field_passthrough() {
        let schedule = parse_schedule("*/10 * * * * *").unwrap();
        let after = Local.with_ymd_and_hms(2025, 1, 10, 12, 0, 1).unwrap();
        assert_eq!(next_run(&schedule, after).unwrap().second(), 10);
    }

    #[test]
    fn test_invalid_expressions() {
        assert_matches!(parse_schedule("* *"), Err(MirrorError::Configuration { .. }));
        assert_matches!(parse_schedule("61 * * * *"), Err(MirrorError::Configuration { .. }));
        assert_matches!(parse_schedule(""), Err(MirrorError::Configuration { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_runs_after_delay() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let job = ScheduledJob::once("test", Duration::from_secs(3), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(job.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_once_never_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let job = ScheduledJob::once("test", Duration::from_secs(3), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        job.cancel().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_reaches_running_job() {
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let stopped = Arc::new(AtomicUsize::new(0));
        let counter = stopped.clone();
        let job = ScheduledJob::once("test", Duration::ZERO, move |cancel| async move {
            let _ = started_tx.send(());
            // Stands in for a long full sync that only stops when asked
            cancel.cancelled().await;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        started_rx.await.unwrap();
        job.cancel().await;
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }
}
