// =============================================================================
// Executor — risk-gated portfolio mutations over the paper book
// =============================================================================
//
// All mutations for one decision happen inside a single transaction that
// locks the affected portfolio rows (ticker + CASH) with SELECT .. FOR
// UPDATE, so concurrent workers can never race the same position and a
// crash between decision and execution leaves state untouched.
//
// The trade journal is append-only and is the single source of truth:
// realized PnL is replayed from it rather than stored.
// =============================================================================

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{MeridianError, Result};
use crate::quote_store::QuoteStore;
use crate::risk::{PortfolioExposure, RiskManager};
use crate::session::SessionPhase;
use crate::strategy::Regime;
use crate::types::{Side, TradeSignal};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// One journal row.
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub id: i32,
    pub ts: NaiveDateTime,
    pub ticker: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub signal_type: String,
    pub strategy_name: Option<String>,
    pub total_value: f64,
    pub sentiment_at_trade: Option<f64>,
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Serialize)]
pub enum ExecutionOutcome {
    Executed(TradeRecord),
    /// Vetoed by the risk manager (or by the cash floor).
    Blocked(String),
    /// Nothing to do — no quote, no position, zero quantity.
    Skipped(String),
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Executed(t) => write!(f, "Executed({} {} x{:.0} @ {:.2})", t.side, t.ticker, t.quantity, t.price),
            Self::Blocked(reason) => write!(f, "Blocked({reason})"),
            Self::Skipped(reason) => write!(f, "Skipped({reason})"),
        }
    }
}

/// One open position with a mark against the latest close.
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    pub ticker: String,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub last_price: Option<f64>,
    pub unrealized_pnl: Option<f64>,
}

/// Aggregate journal statistics.
#[derive(Debug, Clone, Serialize)]
pub struct JournalStats {
    pub total_trades: usize,
    pub win_rate: f64,
    pub total_net_pnl: f64,
    pub profit_factor: f64,
}

/// The portfolio as the API reports it.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioView {
    pub cash: f64,
    pub positions: Vec<PositionView>,
    pub stats: Option<JournalStats>,
}

// ---------------------------------------------------------------------------
// Pure sizing / exit helpers
// ---------------------------------------------------------------------------

/// Default sizing rule: floor(capital × weight / price), in whole units.
pub fn default_quantity(capital: f64, signal: TradeSignal, price: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    (capital * signal.sizing_weight() / price).floor()
}

/// Weighted-average entry price after adding to a position.
pub fn weighted_avg_entry(old_qty: f64, old_avg: f64, add_qty: f64, price: f64) -> f64 {
    let total = old_qty + add_qty;
    if total <= 0.0 {
        return 0.0;
    }
    (old_qty * old_avg + add_qty * price) / total
}

/// Weekday count strictly after `from`, up to and including `to`.
pub fn trading_days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    let mut days = 0;
    let mut d = from;
    while d < to {
        d += Duration::days(1);
        if !matches!(d.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
            days += 1;
        }
    }
    days
}

/// Exit-rule evaluation for one open long. `is_intraday` marks positions
/// opened by the 5-minute strategy, which time out after 2 trading days.
pub fn exit_reason(
    entry: f64,
    price: f64,
    stop_pct: f64,
    target_pct: f64,
    held_trading_days: i64,
    is_intraday: bool,
) -> Option<&'static str> {
    if stop_pct > 0.0 && price <= entry * (1.0 - stop_pct / 100.0) {
        return Some("STOP_LOSS");
    }
    if target_pct > 0.0 && price >= entry * (1.0 + target_pct / 100.0) {
        return Some("TAKE_PROFIT");
    }
    if is_intraday && held_trading_days > 2 {
        return Some("TIMEOUT");
    }
    None
}

/// Minimal journal view for replay.
#[derive(Debug, Clone)]
pub struct JournalRow {
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub date: NaiveDate,
}

/// Replay a single ticker's journal under average-cost accounting and return
/// the realized PnL of sells executed on `on`.
pub fn realized_pnl_on(trades: &[JournalRow], on: NaiveDate) -> f64 {
    let mut qty = 0.0_f64;
    let mut avg = 0.0_f64;
    let mut realized = 0.0_f64;

    for t in trades {
        match t.side {
            Side::Buy => {
                avg = weighted_avg_entry(qty, avg, t.quantity, t.price);
                qty += t.quantity;
            }
            Side::Sell => {
                let sold = t.quantity.min(qty);
                if t.date == on {
                    realized += (t.price - avg) * sold - t.commission;
                }
                qty -= sold;
                if qty <= 0.0 {
                    qty = 0.0;
                    avg = 0.0;
                }
            }
        }
    }
    realized
}

/// Derive (stop %, target %) from a journal `strategy_name`. Names carry an
/// optional "/5m" suffix for intraday entries.
pub fn exit_params_for(strategy_name: Option<&str>, fallback_stop_pct: f64) -> (f64, f64, bool) {
    let Some(name) = strategy_name else {
        return (fallback_stop_pct, 0.0, false);
    };
    let is_intraday = name.ends_with("/5m");
    let base = name.strip_suffix("/5m").unwrap_or(name);
    match Regime::parse(base).and_then(|r| r.stop_target()) {
        Some((stop, target)) => (stop, target, is_intraday),
        None => (fallback_stop_pct, 0.0, is_intraday),
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    pool: PgPool,
    quotes: Arc<QuoteStore>,
    risk: Arc<RiskManager>,
    clock: Clock,
    commission_rate: f64,
    sell_slippage_pct: f64,
    fallback_stop_pct: f64,
}

impl Executor {
    pub fn new(
        pool: PgPool,
        quotes: Arc<QuoteStore>,
        risk: Arc<RiskManager>,
        clock: Clock,
        commission_rate: f64,
        sell_slippage_pct: f64,
        fallback_stop_pct: f64,
    ) -> Self {
        Self {
            pool,
            quotes,
            risk,
            clock,
            commission_rate,
            sell_slippage_pct,
            fallback_stop_pct,
        }
    }

    // ── Buy ─────────────────────────────────────────────────────────────

    /// Open or add to a position. Quantity defaults to the sizing rule;
    /// price defaults to the latest close under the clock.
    pub async fn buy(
        &self,
        ticker: &str,
        signal: TradeSignal,
        strategy_name: Option<&str>,
        quantity: Option<f64>,
        price: Option<f64>,
        sentiment: Option<f64>,
        phase: SessionPhase,
    ) -> Result<ExecutionOutcome> {
        if signal.sizing_weight() <= 0.0 {
            return Ok(ExecutionOutcome::Skipped(format!(
                "{signal} is not an entry signal"
            )));
        }

        let price = match price {
            Some(p) if p > 0.0 => p,
            _ => match self.quotes.latest_close(ticker, self.clock.today()).await? {
                Some((_, close)) => close,
                None => {
                    return Ok(ExecutionOutcome::Skipped(format!("no quote for {ticker}")))
                }
            },
        };

        let capital = self.risk.config().total_capital_usd;
        let quantity = match quantity {
            Some(q) if q > 0.0 => q.floor(),
            _ => default_quantity(capital, signal, price),
        };
        if quantity <= 0.0 {
            return Ok(ExecutionOutcome::Skipped("computed quantity is zero".into()));
        }

        let mut tx = self.pool.begin().await?;

        let (cash, pos_qty, pos_avg) = lock_rows(&mut tx, ticker).await?;
        let exposure = self.gather_exposure(&mut tx, ticker).await?;

        let position_usd = quantity * price;
        let verdict = self.risk.check_buy(position_usd, &exposure, phase);
        if !verdict.allow {
            // Dropping the transaction rolls everything back.
            return Ok(ExecutionOutcome::Blocked(
                verdict.reason.unwrap_or_else(|| "risk veto".into()),
            ));
        }

        let commission = position_usd * self.commission_rate;
        let total_debit = position_usd + commission;
        if cash < total_debit {
            return Ok(ExecutionOutcome::Blocked(format!(
                "insufficient cash: ${cash:.2} < ${total_debit:.2}"
            )));
        }

        let now = self.clock.now().naive_utc();
        let new_qty = pos_qty + quantity;
        let new_avg = weighted_avg_entry(pos_qty, pos_avg, quantity, price);

        sqlx::query(
            "UPDATE portfolio_state SET quantity = quantity - $1, last_updated = $2
             WHERE ticker = 'CASH'",
        )
        .bind(total_debit)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO portfolio_state (ticker, quantity, avg_entry_price, last_updated)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (ticker) DO UPDATE
               SET quantity = $2, avg_entry_price = $3, last_updated = $4",
        )
        .bind(ticker)
        .bind(new_qty)
        .bind(new_avg)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let record = insert_trade(
            &mut tx,
            now,
            ticker,
            Side::Buy,
            quantity,
            price,
            commission,
            signal.as_str(),
            strategy_name,
            total_debit,
            sentiment,
        )
        .await?;

        tx.commit().await?;

        info!(
            ticker,
            signal = %signal,
            quantity,
            price,
            commission,
            cash_after = cash - total_debit,
            "BUY executed"
        );
        Ok(ExecutionOutcome::Executed(record))
    }

    // ── Sell ────────────────────────────────────────────────────────────

    /// Close the full position. `signal_type` records why (STRONG sell
    /// signal, STOP_LOSS, TAKE_PROFIT, TIMEOUT, MANUAL...).
    pub async fn sell(
        &self,
        ticker: &str,
        signal_type: &str,
        price: Option<f64>,
        sentiment: Option<f64>,
    ) -> Result<ExecutionOutcome> {
        let quoted = match price {
            Some(p) if p > 0.0 => p,
            _ => match self.quotes.latest_close(ticker, self.clock.today()).await? {
                Some((_, close)) => close,
                None => {
                    return Ok(ExecutionOutcome::Skipped(format!("no quote for {ticker}")))
                }
            },
        };
        // Paper fills assume adverse slippage on exits when configured.
        let exec_price = quoted * (1.0 - self.sell_slippage_pct / 100.0);

        let mut tx = self.pool.begin().await?;
        let (_cash, pos_qty, pos_avg) = lock_rows(&mut tx, ticker).await?;

        if pos_qty <= 0.0 {
            return Ok(ExecutionOutcome::Skipped(format!(
                "no open position in {ticker}"
            )));
        }

        let proceeds = pos_qty * exec_price;
        let commission = proceeds * self.commission_rate;
        let credit = proceeds - commission;
        let now = self.clock.now().naive_utc();
        let realized = (exec_price - pos_avg) * pos_qty - commission;

        // The opening trade's strategy label travels onto the closing row.
        let strategy_name: Option<String> = sqlx::query(
            "SELECT strategy_name FROM trade_history
             WHERE ticker = $1 AND side = 'BUY'
             ORDER BY ts DESC LIMIT 1",
        )
        .bind(ticker)
        .fetch_optional(&mut *tx)
        .await?
        .and_then(|r| r.get("strategy_name"));

        sqlx::query(
            "UPDATE portfolio_state SET quantity = quantity + $1, last_updated = $2
             WHERE ticker = 'CASH'",
        )
        .bind(credit)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE portfolio_state SET quantity = 0, avg_entry_price = 0, last_updated = $1
             WHERE ticker = $2",
        )
        .bind(now)
        .bind(ticker)
        .execute(&mut *tx)
        .await?;

        let record = insert_trade(
            &mut tx,
            now,
            ticker,
            Side::Sell,
            pos_qty,
            exec_price,
            commission,
            signal_type,
            strategy_name.as_deref(),
            credit,
            sentiment,
        )
        .await?;

        tx.commit().await?;

        info!(
            ticker,
            signal_type,
            quantity = pos_qty,
            exec_price,
            realized_pnl = realized,
            "SELL executed"
        );
        Ok(ExecutionOutcome::Executed(record))
    }

    // ── Exit rules ──────────────────────────────────────────────────────

    /// Scan open positions and close any that hit their stop, target, or
    /// intraday timeout. Returns the journal rows produced.
    pub async fn apply_exit_rules(&self) -> Result<Vec<TradeRecord>> {
        let today = self.clock.today();
        let positions = self.open_positions().await?;
        let mut closed = Vec::new();

        for pos in positions {
            let Some((_, last)) = self.quotes.latest_close(&pos.ticker, today).await? else {
                continue;
            };

            let opening = sqlx::query(
                "SELECT ts, strategy_name FROM trade_history
                 WHERE ticker = $1 AND side = 'BUY'
                 ORDER BY ts DESC LIMIT 1",
            )
            .bind(&pos.ticker)
            .fetch_optional(&self.pool)
            .await?;

            let (entry_date, strategy_name): (NaiveDate, Option<String>) = match &opening {
                Some(row) => (
                    row.get::<NaiveDateTime, _>("ts").date(),
                    row.get("strategy_name"),
                ),
                None => (today, None),
            };

            let (stop_pct, target_pct, is_intraday) =
                exit_params_for(strategy_name.as_deref(), self.fallback_stop_pct);
            let held = trading_days_between(entry_date, today);

            if let Some(reason) = exit_reason(
                pos.avg_entry_price,
                last,
                stop_pct,
                target_pct,
                held,
                is_intraday,
            ) {
                match self.sell(&pos.ticker, reason, Some(last), None).await? {
                    ExecutionOutcome::Executed(record) => closed.push(record),
                    other => {
                        warn!(ticker = %pos.ticker, outcome = %other, "exit sell did not execute");
                    }
                }
            }
        }

        Ok(closed)
    }

    // ── Views ───────────────────────────────────────────────────────────

    pub async fn open_positions(&self) -> Result<Vec<PositionView>> {
        let rows = sqlx::query(
            "SELECT ticker, quantity::float8 AS quantity,
                    avg_entry_price::float8 AS avg_entry_price
             FROM portfolio_state
             WHERE ticker <> 'CASH' AND quantity > 0
             ORDER BY ticker",
        )
        .fetch_all(&self.pool)
        .await?;

        let today = self.clock.today();
        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            let ticker: String = row.get("ticker");
            let quantity: f64 = row.get("quantity");
            let avg_entry_price: f64 = row.get("avg_entry_price");
            let last_price = self
                .quotes
                .latest_close(&ticker, today)
                .await?
                .map(|(_, c)| c);
            let unrealized_pnl = last_price.map(|p| (p - avg_entry_price) * quantity);

            positions.push(PositionView {
                ticker,
                quantity,
                avg_entry_price,
                last_price,
                unrealized_pnl,
            });
        }
        Ok(positions)
    }

    pub async fn cash(&self) -> Result<f64> {
        let row = sqlx::query(
            "SELECT quantity::float8 AS cash FROM portfolio_state WHERE ticker = 'CASH'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("cash")).unwrap_or(0.0))
    }

    /// Full portfolio view with journal statistics.
    pub async fn portfolio(&self) -> Result<PortfolioView> {
        let cash = self.cash().await?;
        let positions = self.open_positions().await?;
        let stats = self.journal_stats().await?;
        Ok(PortfolioView {
            cash,
            positions,
            stats,
        })
    }

    pub async fn trades(&self, limit: i64, ticker: Option<&str>) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            "SELECT id, ts, ticker, side, quantity::float8 AS quantity,
                    price::float8 AS price, commission::float8 AS commission,
                    signal_type, strategy_name, total_value::float8 AS total_value,
                    sentiment_at_trade::float8 AS sentiment_at_trade
             FROM trade_history
             WHERE ($2 = '' OR ticker = $2)
             ORDER BY ts DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .bind(ticker.unwrap_or(""))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_trade).collect())
    }

    async fn journal_stats(&self) -> Result<Option<JournalStats>> {
        // Realized PnL per closing trade via average-cost replay.
        let tickers: Vec<String> = sqlx::query(
            "SELECT DISTINCT ticker FROM trade_history WHERE side = 'SELL'",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| r.get("ticker"))
        .collect();

        if tickers.is_empty() {
            return Ok(None);
        }

        let mut pnls = Vec::new();
        for ticker in &tickers {
            let journal = self.journal_for(ticker).await?;
            let mut qty = 0.0_f64;
            let mut avg = 0.0_f64;
            for t in &journal {
                match t.side {
                    Side::Buy => {
                        avg = weighted_avg_entry(qty, avg, t.quantity, t.price);
                        qty += t.quantity;
                    }
                    Side::Sell => {
                        let sold = t.quantity.min(qty);
                        pnls.push((t.price - avg) * sold - t.commission);
                        qty = (qty - sold).max(0.0);
                        if qty == 0.0 {
                            avg = 0.0;
                        }
                    }
                }
            }
        }

        let total_trades = pnls.len();
        if total_trades == 0 {
            return Ok(None);
        }
        let wins = pnls.iter().filter(|p| **p > 0.0).count();
        let total_net_pnl: f64 = pnls.iter().sum();
        let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
        let gross_loss: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        Ok(Some(JournalStats {
            total_trades,
            win_rate: wins as f64 / total_trades as f64,
            total_net_pnl,
            profit_factor,
        }))
    }

    // ── Internals ───────────────────────────────────────────────────────

    async fn journal_for(&self, ticker: &str) -> Result<Vec<JournalRow>> {
        let rows = sqlx::query(
            "SELECT ts, side, quantity::float8 AS quantity, price::float8 AS price,
                    commission::float8 AS commission
             FROM trade_history WHERE ticker = $1 ORDER BY ts, id",
        )
        .bind(ticker)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| JournalRow {
                side: if r.get::<String, _>("side") == "SELL" {
                    Side::Sell
                } else {
                    Side::Buy
                },
                quantity: r.get("quantity"),
                price: r.get("price"),
                commission: r.get("commission"),
                date: r.get::<NaiveDateTime, _>("ts").date(),
            })
            .collect())
    }

    /// Exposure facts for the risk manager, read inside the transaction.
    async fn gather_exposure(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ticker: &str,
    ) -> Result<PortfolioExposure> {
        let row = sqlx::query(
            "SELECT count(*) AS open_count,
                    coalesce(sum(quantity * avg_entry_price), 0)::float8 AS total_exposure
             FROM portfolio_state
             WHERE ticker <> 'CASH' AND quantity > 0",
        )
        .fetch_one(&mut **tx)
        .await?;

        let open_positions: i64 = row.get("open_count");
        let total_exposure_usd: f64 = row.get("total_exposure");

        let ticker_row = sqlx::query(
            "SELECT coalesce(quantity * avg_entry_price, 0)::float8 AS exposure
             FROM portfolio_state WHERE ticker = $1",
        )
        .bind(ticker)
        .fetch_optional(&mut **tx)
        .await?;
        let ticker_exposure_usd: f64 = ticker_row.map(|r| r.get("exposure")).unwrap_or(0.0);

        // Daily realized loss: replay today's closed trades.
        let today = self.clock.today();
        let sell_tickers: Vec<String> = sqlx::query(
            "SELECT DISTINCT ticker FROM trade_history
             WHERE side = 'SELL' AND ts::date = $1",
        )
        .bind(today)
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .map(|r| r.get("ticker"))
        .collect();

        let mut realized_today = 0.0;
        for t in &sell_tickers {
            let journal = self.journal_for(t).await?;
            realized_today += realized_pnl_on(&journal, today);
        }

        // Unrealized loss across open positions, marked at the latest close.
        let mut unrealized_loss = 0.0;
        for pos in self.open_positions().await? {
            if let Some(pnl) = pos.unrealized_pnl {
                if pnl < 0.0 {
                    unrealized_loss += -pnl;
                }
            }
        }

        Ok(PortfolioExposure {
            open_positions: open_positions as u32,
            total_exposure_usd,
            ticker_exposure_usd,
            realized_loss_today_usd: (-realized_today).max(0.0),
            unrealized_loss_usd: unrealized_loss,
        })
    }
}

/// Lock the CASH and ticker rows for the duration of the transaction.
/// Returns (cash, position quantity, position avg entry).
async fn lock_rows(
    tx: &mut Transaction<'_, Postgres>,
    ticker: &str,
) -> Result<(f64, f64, f64)> {
    let rows = sqlx::query(
        "SELECT ticker, quantity::float8 AS quantity,
                avg_entry_price::float8 AS avg_entry_price
         FROM portfolio_state
         WHERE ticker = 'CASH' OR ticker = $1
         ORDER BY ticker
         FOR UPDATE",
    )
    .bind(ticker)
    .fetch_all(&mut **tx)
    .await?;

    let mut cash = None;
    let mut pos_qty = 0.0;
    let mut pos_avg = 0.0;
    for row in rows {
        let t: String = row.get("ticker");
        if t == "CASH" {
            cash = Some(row.get::<f64, _>("quantity"));
        } else {
            pos_qty = row.get("quantity");
            pos_avg = row.get("avg_entry_price");
        }
    }

    let cash = cash.ok_or_else(|| {
        MeridianError::Config("portfolio_state has no CASH row — was the book seeded?".into())
    })?;
    Ok((cash, pos_qty, pos_avg))
}

#[allow(clippy::too_many_arguments)]
async fn insert_trade(
    tx: &mut Transaction<'_, Postgres>,
    ts: NaiveDateTime,
    ticker: &str,
    side: Side,
    quantity: f64,
    price: f64,
    commission: f64,
    signal_type: &str,
    strategy_name: Option<&str>,
    total_value: f64,
    sentiment: Option<f64>,
) -> Result<TradeRecord> {
    let row = sqlx::query(
        "INSERT INTO trade_history
             (ts, ticker, side, quantity, price, commission, signal_type,
              strategy_name, total_value, sentiment_at_trade)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         RETURNING id",
    )
    .bind(ts)
    .bind(ticker)
    .bind(side.as_str())
    .bind(quantity)
    .bind(price)
    .bind(commission)
    .bind(signal_type)
    .bind(strategy_name)
    .bind(total_value)
    .bind(sentiment.map(|s| s.clamp(0.0, 1.0)))
    .fetch_one(&mut **tx)
    .await?;

    Ok(TradeRecord {
        id: row.get("id"),
        ts,
        ticker: ticker.to_string(),
        side,
        quantity,
        price,
        commission,
        signal_type: signal_type.to_string(),
        strategy_name: strategy_name.map(str::to_string),
        total_value,
        sentiment_at_trade: sentiment,
    })
}

fn row_to_trade(row: &sqlx::postgres::PgRow) -> TradeRecord {
    TradeRecord {
        id: row.get("id"),
        ts: row.get("ts"),
        ticker: row.get("ticker"),
        side: if row.get::<String, _>("side") == "SELL" {
            Side::Sell
        } else {
            Side::Buy
        },
        quantity: row.get("quantity"),
        price: row.get("price"),
        commission: row.get("commission"),
        signal_type: row.get("signal_type"),
        strategy_name: row.get("strategy_name"),
        total_value: row.get("total_value"),
        sentiment_at_trade: row.get("sentiment_at_trade"),
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("commission_rate", &self.commission_rate)
            .field("sell_slippage_pct", &self.sell_slippage_pct)
            .finish()
    }
}

// =============================================================================
// Tests (pure helpers; the SQL paths are exercised against a live book)
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizing_rule_floors_whole_units() {
        // Seed scenario: capital 10k, STRONG_BUY at 350 → floor(10000/350) = 28.
        assert_eq!(default_quantity(10_000.0, TradeSignal::StrongBuy, 350.0), 28.0);
        // BUY halves the allocation: floor(5000/350) = 14.
        assert_eq!(default_quantity(10_000.0, TradeSignal::Buy, 350.0), 14.0);
        assert_eq!(default_quantity(10_000.0, TradeSignal::Hold, 350.0), 0.0);
        assert_eq!(default_quantity(10_000.0, TradeSignal::StrongBuy, 0.0), 0.0);
    }

    #[test]
    fn weighted_average_entry() {
        // 10 @ 100 plus 10 @ 110 → 20 @ 105.
        assert_eq!(weighted_avg_entry(10.0, 100.0, 10.0, 110.0), 105.0);
        // Fresh position takes the fill price.
        assert_eq!(weighted_avg_entry(0.0, 0.0, 5.0, 42.0), 42.0);
        assert_eq!(weighted_avg_entry(0.0, 0.0, 0.0, 42.0), 0.0);
    }

    #[test]
    fn trading_day_counting_skips_weekends() {
        // Fri 2025-03-07 → Mon 2025-03-10 is one trading day.
        let fri = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        let mon = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        assert_eq!(trading_days_between(fri, mon), 1);

        // Mon → Thu spans three.
        let thu = NaiveDate::from_ymd_opt(2025, 3, 13).unwrap();
        assert_eq!(trading_days_between(mon, thu), 3);
        assert_eq!(trading_days_between(mon, mon), 0);
    }

    #[test]
    fn exit_rules_fire_in_priority_order() {
        // Stop: entry 100, stop 3% → 97 triggers.
        assert_eq!(exit_reason(100.0, 96.9, 3.0, 8.0, 0, false), Some("STOP_LOSS"));
        assert_eq!(exit_reason(100.0, 97.0, 3.0, 8.0, 0, false), Some("STOP_LOSS"));
        // Target: 108 triggers.
        assert_eq!(exit_reason(100.0, 108.0, 3.0, 8.0, 0, false), Some("TAKE_PROFIT"));
        // Neither; not intraday → stays open regardless of age.
        assert_eq!(exit_reason(100.0, 101.0, 3.0, 8.0, 30, false), None);
        // Intraday positions time out after 2 trading days.
        assert_eq!(exit_reason(100.0, 101.0, 3.0, 8.0, 3, true), Some("TIMEOUT"));
        assert_eq!(exit_reason(100.0, 101.0, 3.0, 8.0, 2, true), None);
    }

    #[test]
    fn exit_params_come_from_the_recorded_strategy() {
        assert_eq!(exit_params_for(Some("Momentum"), 5.0), (3.0, 8.0, false));
        assert_eq!(exit_params_for(Some("VolatileGap/5m"), 5.0), (7.0, 12.0, true));
        // Unknown label: fall back to the configured stop, no target.
        assert_eq!(exit_params_for(Some("Legacy"), 5.0), (5.0, 0.0, false));
        assert_eq!(exit_params_for(None, 5.0), (5.0, 0.0, false));
    }

    #[test]
    fn replay_realizes_pnl_on_the_sell_date() {
        let d = |day| NaiveDate::from_ymd_opt(2025, 3, day).unwrap();
        let journal = vec![
            JournalRow { side: Side::Buy, quantity: 10.0, price: 100.0, commission: 1.0, date: d(3) },
            JournalRow { side: Side::Buy, quantity: 10.0, price: 110.0, commission: 1.1, date: d(4) },
            // Sells all 20 at 120 on the 10th; avg cost is 105.
            JournalRow { side: Side::Sell, quantity: 20.0, price: 120.0, commission: 2.4, date: d(10) },
        ];
        let pnl = realized_pnl_on(&journal, d(10));
        assert!((pnl - ((120.0 - 105.0) * 20.0 - 2.4)).abs() < 1e-9);
        // Nothing realized on other days.
        assert_eq!(realized_pnl_on(&journal, d(11)), 0.0);
    }

    #[test]
    fn replay_signed_quantities_match_position() {
        // Invariant: sum of signed journal quantities equals the position.
        let d = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let journal = vec![
            JournalRow { side: Side::Buy, quantity: 15.0, price: 50.0, commission: 0.5, date: d },
            JournalRow { side: Side::Sell, quantity: 15.0, price: 55.0, commission: 0.5, date: d },
        ];
        let signed: f64 = journal
            .iter()
            .map(|t| match t.side {
                Side::Buy => t.quantity,
                Side::Sell => -t.quantity,
            })
            .sum();
        assert_eq!(signed, 0.0);
    }
}
