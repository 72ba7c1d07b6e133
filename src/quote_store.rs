// =============================================================================
// Quote store — sole writer of the `quotes` table
// =============================================================================
//
// Bars are immutable once inserted; re-inserting an existing (ticker, date)
// is a no-op. Indicator columns (sma_5, volatility_5, rsi) are derived and
// recomputed after every batch of inserts. An external RSI feed, when
// configured, overwrites the computed value on the most recent bar.
//
// Reads used by the analyst take an `as_of` date so replay clocks cannot
// look ahead.
// =============================================================================

use chrono::{Duration, NaiveDate};
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use crate::error::Result;
use crate::indicators::{trailing_mean, trailing_rsi, trailing_stddev};
use crate::providers::{ProviderBar, QuoteProvider, RsiProvider};
use crate::types::Bar;

const SMA_WINDOW: usize = 5;
const VOLATILITY_WINDOW: usize = 5;
const RSI_PERIOD: usize = 14;

/// Summary of one refresh sweep across tickers.
#[derive(Debug, Default)]
pub struct RefreshSummary {
    pub tickers_ok: usize,
    pub bars_inserted: u64,
    pub errors: Vec<String>,
}

pub struct QuoteStore {
    pool: PgPool,
}

impl QuoteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Insert bars missing by (ticker, date). Returns the number actually
    /// inserted; duplicates are silently skipped.
    pub async fn upsert_bars(&self, ticker: &str, bars: &[ProviderBar]) -> Result<u64> {
        let mut inserted = 0_u64;
        for bar in bars {
            let result = sqlx::query(
                "INSERT INTO quotes (date, ticker, close, volume)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (date, ticker) DO NOTHING",
            )
            .bind(bar.date)
            .bind(ticker)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }

        if inserted > 0 {
            info!(ticker, inserted, "bars upserted");
        }
        Ok(inserted)
    }

    /// Recompute sma_5 / volatility_5 / rsi for `ticker`, updating rows on
    /// or after `from_date` (all rows when `None`). The full close history
    /// is loaded so trailing windows are correct at the boundary.
    pub async fn recompute_indicators(
        &self,
        ticker: &str,
        from_date: Option<NaiveDate>,
    ) -> Result<u64> {
        let rows = sqlx::query(
            "SELECT id, date, close::float8 AS close
             FROM quotes WHERE ticker = $1 ORDER BY date",
        )
        .bind(ticker)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.get::<i64, _>("id")).collect();
        let dates: Vec<NaiveDate> = rows.iter().map(|r| r.get("date")).collect();
        let closes: Vec<f64> = rows.iter().map(|r| r.get("close")).collect();

        let sma = trailing_mean(&closes, SMA_WINDOW);
        let vol = trailing_stddev(&closes, VOLATILITY_WINDOW);
        let rsi = trailing_rsi(&closes, RSI_PERIOD);

        let mut updated = 0_u64;
        for i in 0..ids.len() {
            if let Some(cutoff) = from_date {
                if dates[i] < cutoff {
                    continue;
                }
            }
            let result = sqlx::query(
                "UPDATE quotes SET sma_5 = $1, volatility_5 = $2, rsi = $3 WHERE id = $4",
            )
            .bind(sma[i])
            .bind(vol[i])
            .bind(rsi[i])
            .bind(ids[i])
            .execute(&self.pool)
            .await?;
            updated += result.rows_affected();
        }

        Ok(updated)
    }

    /// Overwrite the most recent bar's RSI with an externally sourced value.
    pub async fn apply_external_rsi(&self, ticker: &str, rsi: f64) -> Result<()> {
        sqlx::query(
            "UPDATE quotes SET rsi = $1
             WHERE ticker = $2
               AND date = (SELECT max(date) FROM quotes WHERE ticker = $2)",
        )
        .bind(rsi.clamp(0.0, 100.0))
        .bind(ticker)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Reads (as-of aware) ─────────────────────────────────────────────

    /// Last `limit` bars on or before `as_of`, ascending by date.
    pub async fn recent_bars(
        &self,
        ticker: &str,
        limit: i64,
        as_of: NaiveDate,
    ) -> Result<Vec<Bar>> {
        let rows = sqlx::query(
            "SELECT date, close::float8 AS close, volume,
                    sma_5::float8 AS sma_5,
                    volatility_5::float8 AS volatility_5,
                    rsi::float8 AS rsi
             FROM quotes
             WHERE ticker = $1 AND date <= $2
             ORDER BY date DESC LIMIT $3",
        )
        .bind(ticker)
        .bind(as_of)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut bars: Vec<Bar> = rows
            .into_iter()
            .map(|r| Bar {
                ticker: ticker.to_string(),
                date: r.get("date"),
                close: r.get("close"),
                volume: r.get("volume"),
                sma_5: r.get("sma_5"),
                volatility_5: r.get("volatility_5"),
                rsi: r.get("rsi"),
            })
            .collect();
        bars.reverse();
        Ok(bars)
    }

    /// First bar on or after `date` (nearest trading day forward).
    pub async fn bar_on_or_after(&self, ticker: &str, date: NaiveDate) -> Result<Option<Bar>> {
        let row = sqlx::query(
            "SELECT date, close::float8 AS close, volume,
                    sma_5::float8 AS sma_5,
                    volatility_5::float8 AS volatility_5,
                    rsi::float8 AS rsi
             FROM quotes
             WHERE ticker = $1 AND date >= $2
             ORDER BY date LIMIT 1",
        )
        .bind(ticker)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Bar {
            ticker: ticker.to_string(),
            date: r.get("date"),
            close: r.get("close"),
            volume: r.get("volume"),
            sma_5: r.get("sma_5"),
            volatility_5: r.get("volatility_5"),
            rsi: r.get("rsi"),
        }))
    }

    /// All bars in `[from, to]`, ascending.
    pub async fn bars_between(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Bar>> {
        let rows = sqlx::query(
            "SELECT date, close::float8 AS close, volume,
                    sma_5::float8 AS sma_5,
                    volatility_5::float8 AS volatility_5,
                    rsi::float8 AS rsi
             FROM quotes
             WHERE ticker = $1 AND date >= $2 AND date <= $3
             ORDER BY date",
        )
        .bind(ticker)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Bar {
                ticker: ticker.to_string(),
                date: r.get("date"),
                close: r.get("close"),
                volume: r.get("volume"),
                sma_5: r.get("sma_5"),
                volatility_5: r.get("volatility_5"),
                rsi: r.get("rsi"),
            })
            .collect())
    }

    /// Mean volatility_5 over the last `n` bars on or before `as_of`.
    pub async fn avg_volatility(
        &self,
        ticker: &str,
        n: i64,
        as_of: NaiveDate,
    ) -> Result<Option<f64>> {
        let row = sqlx::query(
            "SELECT avg(volatility_5)::float8 AS avg_vol FROM (
                 SELECT volatility_5 FROM quotes
                 WHERE ticker = $1 AND date <= $2 AND volatility_5 IS NOT NULL
                 ORDER BY date DESC LIMIT $3
             ) recent",
        )
        .bind(ticker)
        .bind(as_of)
        .bind(n)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("avg_vol"))
    }

    /// Most recent close on or before `as_of`.
    pub async fn latest_close(
        &self,
        ticker: &str,
        as_of: NaiveDate,
    ) -> Result<Option<(NaiveDate, f64)>> {
        let row = sqlx::query(
            "SELECT date, close::float8 AS close FROM quotes
             WHERE ticker = $1 AND date <= $2
             ORDER BY date DESC LIMIT 1",
        )
        .bind(ticker)
        .bind(as_of)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| (r.get("date"), r.get("close"))))
    }

    // ── Provider refresh ────────────────────────────────────────────────

    /// Fetch `lookback_days` of bars for one ticker, insert what is missing,
    /// and recompute indicators over the affected tail.
    pub async fn refresh_ticker(
        &self,
        provider: &dyn QuoteProvider,
        ticker: &str,
        lookback_days: i64,
        today: NaiveDate,
    ) -> Result<u64> {
        let from = today - Duration::days(lookback_days);
        let bars = crate::providers::with_retry("quote_bars", || {
            provider.get_bars(ticker, from, today)
        })
        .await?;
        let inserted = self.upsert_bars(ticker, &bars).await?;

        if inserted > 0 {
            // Extend the recompute window backwards so trailing indicators
            // at the seam see their full warm-up.
            let recompute_from =
                from - Duration::days((RSI_PERIOD + SMA_WINDOW) as i64);
            self.recompute_indicators(ticker, Some(recompute_from)).await?;
        }
        Ok(inserted)
    }

    /// Refresh a set of tickers, isolating per-ticker failures: one bad
    /// ticker is logged and retried on the next cycle, the rest proceed.
    pub async fn refresh_all(
        &self,
        provider: &dyn QuoteProvider,
        rsi_feed: Option<&dyn RsiProvider>,
        tickers: &[String],
        lookback_days: i64,
        today: NaiveDate,
    ) -> RefreshSummary {
        let mut summary = RefreshSummary::default();

        for ticker in tickers {
            match self
                .refresh_ticker(provider, ticker, lookback_days, today)
                .await
            {
                Ok(inserted) => {
                    summary.tickers_ok += 1;
                    summary.bars_inserted += inserted;

                    if let Some(feed) = rsi_feed {
                        match feed.get_rsi(ticker).await {
                            Ok(rsi) => {
                                if let Err(e) = self.apply_external_rsi(ticker, rsi).await {
                                    warn!(ticker, error = %e, "external RSI write failed");
                                }
                            }
                            Err(e) => {
                                warn!(ticker, error = %e, "external RSI fetch failed — keeping computed value");
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(ticker, error = %e, "quote refresh failed — will retry next cycle");
                    summary.errors.push(format!("{ticker}: {e}"));
                }
            }
        }

        info!(
            ok = summary.tickers_ok,
            inserted = summary.bars_inserted,
            errors = summary.errors.len(),
            "quote refresh sweep complete"
        );
        summary
    }
}

impl std::fmt::Debug for QuoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteStore").finish()
    }
}
