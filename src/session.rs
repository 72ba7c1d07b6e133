// =============================================================================
// Session oracle — NYSE trading phases and pre-market context
// =============================================================================
//
// Phases follow the NYSE clock in America/New_York:
//   PRE_MARKET  04:00–09:30
//   REGULAR     09:30–16:00
//   POST_MARKET 16:00–20:00
//   CLOSED      otherwise, and all weekend
//
// This module is the only caller of the quote capability's off-hours
// endpoint; everything else sees pre-market data through PremarketContext.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;
use serde::Serialize;

use crate::clock::Clock;
use crate::providers::QuoteProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    #[serde(rename = "PRE_MARKET")]
    PreMarket,
    #[serde(rename = "REGULAR")]
    Regular,
    #[serde(rename = "POST_MARKET")]
    PostMarket,
    #[serde(rename = "CLOSED")]
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PreMarket => "PRE_MARKET",
            Self::Regular => "REGULAR",
            Self::PostMarket => "POST_MARKET",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Everything the analyst needs to reason about a pre-market entry.
#[derive(Debug, Clone, Serialize)]
pub struct PremarketContext {
    pub ticker: String,
    pub prev_close: f64,
    pub premarket_last: f64,
    pub premarket_gap_pct: f64,
    pub minutes_until_open: Option<i64>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Pure session math (unit-tested without a clock or network)
// ---------------------------------------------------------------------------

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("valid session time")
}

/// Session phase at an instant, evaluated on the NYSE clock.
pub fn phase_at(instant: DateTime<Utc>) -> SessionPhase {
    let local = instant.with_timezone(&New_York);
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return SessionPhase::Closed;
    }

    let now = local.time();
    if now >= t(4, 0) && now < t(9, 30) {
        SessionPhase::PreMarket
    } else if now >= t(9, 30) && now < t(16, 0) {
        SessionPhase::Regular
    } else if now >= t(16, 0) && now < t(20, 0) {
        SessionPhase::PostMarket
    } else {
        SessionPhase::Closed
    }
}

/// Minutes until the 09:30 open; only meaningful during PRE_MARKET.
pub fn minutes_until_open_at(instant: DateTime<Utc>) -> Option<i64> {
    if phase_at(instant) != SessionPhase::PreMarket {
        return None;
    }
    let local = instant.with_timezone(&New_York);
    let open = New_York
        .from_local_datetime(&local.date_naive().and_time(t(9, 30)))
        .single()?;
    Some((open - local).num_minutes())
}

/// Pre-market gap in percent.
pub fn gap_pct(prev_close: f64, premarket_last: f64) -> f64 {
    if prev_close == 0.0 {
        0.0
    } else {
        (premarket_last - prev_close) / prev_close * 100.0
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

pub struct SessionOracle {
    clock: Clock,
    quotes: Arc<dyn QuoteProvider>,
}

impl SessionOracle {
    pub fn new(clock: Clock, quotes: Arc<dyn QuoteProvider>) -> Self {
        Self { clock, quotes }
    }

    pub fn phase(&self) -> SessionPhase {
        phase_at(self.clock.now())
    }

    pub fn minutes_until_open(&self) -> Option<i64> {
        minutes_until_open_at(self.clock.now())
    }

    /// Fetch the pre-market snapshot for `ticker`. Feed failures surface in
    /// the `error` field rather than as an Err — the analyst degrades, it
    /// does not crash.
    pub async fn premarket_context(&self, ticker: &str) -> PremarketContext {
        let minutes = self.minutes_until_open();

        match self.quotes.get_premarket(ticker).await {
            Ok(quote) => PremarketContext {
                ticker: ticker.to_string(),
                prev_close: quote.prev_close,
                premarket_last: quote.last,
                premarket_gap_pct: gap_pct(quote.prev_close, quote.last),
                minutes_until_open: minutes,
                error: None,
            },
            Err(e) => PremarketContext {
                ticker: ticker.to_string(),
                prev_close: 0.0,
                premarket_last: 0.0,
                premarket_gap_pct: 0.0,
                minutes_until_open: minutes,
                error: Some(e.to_string()),
            },
        }
    }
}

impl std::fmt::Debug for SessionOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOracle")
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2025-03-10 is a Monday; EDT is UTC-4 on that date.
    fn et(h: u32, m: u32) -> DateTime<Utc> {
        New_York
            .with_ymd_and_hms(2025, 3, 10, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn weekday_phase_boundaries() {
        assert_eq!(phase_at(et(3, 59)), SessionPhase::Closed);
        assert_eq!(phase_at(et(4, 0)), SessionPhase::PreMarket);
        assert_eq!(phase_at(et(9, 29)), SessionPhase::PreMarket);
        assert_eq!(phase_at(et(9, 30)), SessionPhase::Regular);
        assert_eq!(phase_at(et(15, 59)), SessionPhase::Regular);
        assert_eq!(phase_at(et(16, 0)), SessionPhase::PostMarket);
        assert_eq!(phase_at(et(19, 59)), SessionPhase::PostMarket);
        assert_eq!(phase_at(et(20, 0)), SessionPhase::Closed);
    }

    #[test]
    fn weekends_are_closed() {
        // 2025-03-08 is a Saturday.
        let saturday_noon = New_York
            .with_ymd_and_hms(2025, 3, 8, 12, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(phase_at(saturday_noon), SessionPhase::Closed);
    }

    #[test]
    fn countdown_to_open() {
        assert_eq!(minutes_until_open_at(et(9, 0)), Some(30));
        assert_eq!(minutes_until_open_at(et(4, 0)), Some(330));
        // Outside pre-market there is no countdown.
        assert_eq!(minutes_until_open_at(et(10, 0)), None);
        assert_eq!(minutes_until_open_at(et(21, 0)), None);
    }

    #[test]
    fn gap_math() {
        assert!((gap_pct(350.0, 360.0) - 2.857142857).abs() < 1e-6);
        assert!((gap_pct(350.0, 340.0) + 2.857142857).abs() < 1e-6);
        assert_eq!(gap_pct(0.0, 100.0), 0.0);
    }
}
