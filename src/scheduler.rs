// =============================================================================
// Scheduler — cooperative, single-process job dispatcher
// =============================================================================
//
// Named jobs carry one or more time specs (daily at, hourly at an offset,
// every N minutes) plus an optional weekday gate. A 30-second resolution
// tick finds specs that became due since the previous tick and spawns the
// job — unless its previous run is still going, in which case the tick is
// skipped and logged (non-overlap guard).
//
// Shutdown: every job receives a child CancellationToken and must stop at
// its next safe point; the scheduler itself drains on the parent token.
// =============================================================================

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Datelike, Duration, Local, NaiveDateTime, Timelike, Weekday};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TICK: std::time::Duration = std::time::Duration::from_secs(30);
/// Upper bound on catch-up scanning after a long stall (one day of minutes).
const MAX_CATCHUP_MINUTES: i64 = 24 * 60;

// ---------------------------------------------------------------------------
// Time specs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    /// Once a day at hour:minute (local time).
    DailyAt { hour: u32, minute: u32 },
    /// Every hour at a minute offset.
    HourlyAt { minute: u32 },
    /// Every `n` minutes, phase-locked to midnight.
    EveryMinutes { n: u32 },
}

impl TimeSpec {
    fn matches_minute(&self, at: NaiveDateTime) -> bool {
        match *self {
            Self::DailyAt { hour, minute } => at.hour() == hour && at.minute() == minute,
            Self::HourlyAt { minute } => at.minute() == minute,
            Self::EveryMinutes { n } => {
                n > 0 && (at.hour() * 60 + at.minute()) % n == 0
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub times: Vec<TimeSpec>,
    pub weekdays_only: bool,
}

impl JobSpec {
    pub fn daily(hour: u32, minute: u32) -> Self {
        Self {
            times: vec![TimeSpec::DailyAt { hour, minute }],
            weekdays_only: false,
        }
    }

    pub fn hourly(minute: u32) -> Self {
        Self {
            times: vec![TimeSpec::HourlyAt { minute }],
            weekdays_only: false,
        }
    }

    pub fn every_minutes(n: u32) -> Self {
        Self {
            times: vec![TimeSpec::EveryMinutes { n }],
            weekdays_only: false,
        }
    }

    pub fn weekdays(mut self) -> Self {
        self.weekdays_only = true;
        self
    }

    pub fn also_daily(mut self, hour: u32, minute: u32) -> Self {
        self.times.push(TimeSpec::DailyAt { hour, minute });
        self
    }

    pub fn also_every_minutes(mut self, n: u32) -> Self {
        self.times.push(TimeSpec::EveryMinutes { n });
        self
    }

    /// Whether any spec has a firing instant in `(prev, now]`.
    pub fn due_between(&self, prev: NaiveDateTime, now: NaiveDateTime) -> bool {
        if now <= prev {
            return false;
        }

        // Walk whole minutes in the window, bounded against long stalls.
        let mut at = truncate_to_minute(prev) + Duration::minutes(1);
        let floor = truncate_to_minute(now);
        let mut scanned = 0;

        while at <= floor && scanned < MAX_CATCHUP_MINUTES {
            if at > prev && at <= now {
                let weekday_ok = !self.weekdays_only
                    || !matches!(at.weekday(), Weekday::Sat | Weekday::Sun);
                if weekday_ok && self.times.iter().any(|t| t.matches_minute(at)) {
                    return true;
                }
            }
            at += Duration::minutes(1);
            scanned += 1;
        }
        false
    }
}

fn truncate_to_minute(at: NaiveDateTime) -> NaiveDateTime {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

pub type JobFuture = Pin<Box<dyn std::future::Future<Output = ()> + Send>>;
pub type JobFn = Arc<dyn Fn(CancellationToken) -> JobFuture + Send + Sync>;

struct Job {
    name: String,
    spec: JobSpec,
    running: Arc<AtomicBool>,
    task: JobFn,
}

pub struct Scheduler {
    jobs: Vec<Job>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            jobs: Vec::new(),
            cancel,
        }
    }

    pub fn add_job<F>(&mut self, name: impl Into<String>, spec: JobSpec, task: F)
    where
        F: Fn(CancellationToken) -> JobFuture + Send + Sync + 'static,
    {
        self.jobs.push(Job {
            name: name.into(),
            spec,
            running: Arc::new(AtomicBool::new(false)),
            task: Arc::new(task),
        });
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    /// Run until the cancellation token fires. Spawned jobs get a child
    /// token so shutdown reaches them at their next safe point.
    pub async fn run(self) {
        info!(jobs = ?self.job_names(), "scheduler started");
        let mut ticker = tokio::time::interval(TICK);
        let mut prev = Local::now().naive_local();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let now = Local::now().naive_local();
            for job in &self.jobs {
                if !job.spec.due_between(prev, now) {
                    continue;
                }

                // Non-overlap guard: skip the tick when still running.
                if job.running.swap(true, Ordering::SeqCst) {
                    warn!(job = %job.name, "previous run still in progress — tick skipped");
                    continue;
                }

                debug!(job = %job.name, "dispatching");
                let running = job.running.clone();
                let task = job.task.clone();
                let token = self.cancel.child_token();
                let name = job.name.clone();

                tokio::spawn(async move {
                    task(token).await;
                    running.store(false, Ordering::SeqCst);
                    debug!(job = %name, "run complete");
                });
            }
            prev = now;
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.job_names())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        // March 2025: the 10th is a Monday, the 8th a Saturday.
        NaiveDate::from_ymd_opt(2025, 3, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn daily_fires_once_in_window() {
        let spec = JobSpec::daily(22, 0);
        assert!(spec.due_between(at(10, 21, 59, 45), at(10, 22, 0, 15)));
        assert!(!spec.due_between(at(10, 22, 0, 15), at(10, 22, 0, 45)));
        assert!(!spec.due_between(at(10, 12, 0, 0), at(10, 12, 0, 30)));
    }

    #[test]
    fn hourly_offset() {
        let spec = JobSpec::hourly(10);
        assert!(spec.due_between(at(10, 9, 9, 45), at(10, 9, 10, 15)));
        assert!(!spec.due_between(at(10, 9, 30, 0), at(10, 9, 30, 30)));
    }

    #[test]
    fn every_five_minutes() {
        let spec = JobSpec::every_minutes(5);
        assert!(spec.due_between(at(10, 9, 4, 45), at(10, 9, 5, 15)));
        assert!(!spec.due_between(at(10, 9, 5, 15), at(10, 9, 6, 45)));
        assert!(spec.due_between(at(10, 9, 9, 45), at(10, 9, 10, 15)));
    }

    #[test]
    fn weekday_gate() {
        // Saturday 2025-03-08.
        let spec = JobSpec::every_minutes(5).weekdays();
        assert!(!spec.due_between(at(8, 9, 4, 45), at(8, 9, 5, 15)));
        // Monday fires.
        assert!(spec.due_between(at(10, 9, 4, 45), at(10, 9, 5, 15)));
    }

    #[test]
    fn multi_spec_jobs() {
        // update_prices: 22:00 daily plus every 2 h during the day.
        let spec = JobSpec::daily(22, 0).also_every_minutes(120);
        assert!(spec.due_between(at(10, 21, 59, 45), at(10, 22, 0, 15)));
        assert!(spec.due_between(at(10, 13, 59, 45), at(10, 14, 0, 15)));
        assert!(!spec.due_between(at(10, 14, 30, 0), at(10, 14, 30, 30)));
    }

    #[test]
    fn catchup_after_stall_fires_once() {
        // A 3-hour stall across a daily mark still catches it.
        let spec = JobSpec::daily(4, 0);
        assert!(spec.due_between(at(10, 2, 0, 0), at(10, 5, 0, 0)));
    }

    #[test]
    fn inverted_window_is_never_due() {
        let spec = JobSpec::every_minutes(1);
        assert!(!spec.due_between(at(10, 9, 10, 0), at(10, 9, 9, 0)));
    }

    #[tokio::test]
    async fn overlap_guard_skips_ticks() {
        // Exercise the guard directly: a held `running` flag forces a skip.
        let running = Arc::new(AtomicBool::new(false));
        assert!(!running.swap(true, Ordering::SeqCst)); // first dispatch wins
        assert!(running.swap(true, Ordering::SeqCst)); // second sees it busy
        running.store(false, Ordering::SeqCst);
        assert!(!running.swap(true, Ordering::SeqCst)); // free again
    }
}
