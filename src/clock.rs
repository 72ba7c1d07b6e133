// =============================================================================
// Clock — wall-clock / replay-clock indirection
// =============================================================================
//
// Every analyst-facing read of quotes or knowledge-base rows filters on
// `ts <= clock.now()`. Swapping the wall clock for a fixed replay clock is
// the entire backtest mode; no other code path changes.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};

#[derive(Clone)]
pub struct Clock {
    now_fn: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl Clock {
    /// The real wall clock.
    pub fn wall() -> Self {
        Self {
            now_fn: Arc::new(Utc::now),
        }
    }

    /// A frozen clock for replay / backtests.
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self {
            now_fn: Arc::new(move || at),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_fn)()
    }

    /// Today's date under this clock (UTC).
    pub fn today(&self) -> chrono::NaiveDate {
        self.now().date_naive()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock").field("now", &self.now()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_does_not_advance() {
        let at = Utc.with_ymd_and_hms(2025, 3, 10, 14, 30, 0).unwrap();
        let clock = Clock::fixed(at);
        assert_eq!(clock.now(), at);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(clock.now(), at);
        assert_eq!(clock.today(), at.date_naive());
    }

    #[test]
    fn wall_clock_is_current() {
        let clock = Clock::wall();
        let before = Utc::now();
        let now = clock.now();
        assert!(now >= before);
    }
}
