// =============================================================================
// Risk manager — six ordered checks gating every BUY
// =============================================================================
//
// Checks, in order:
//   1. Trade size      — position within broker min/max and per-position cap.
//   2. Portfolio       — total exposure within the portfolio percentage cap.
//   3. Ticker          — single-name exposure within its percentage cap.
//   4. Position count  — open positions below the cap.
//   5. Trading hours   — regular session, or pre-market when allowed.
//   6. Daily loss      — realized + unrealized loss below both USD and
//                        percentage limits.
//
// Configuration is a JSON file with serde defaults on every field; a missing
// file yields the conservative defaults.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::session::SessionPhase;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_total_capital() -> f64 {
    10_000.0
}

fn default_max_position_usd() -> f64 {
    2_000.0
}

fn default_max_portfolio_exposure_pct() -> f64 {
    60.0
}

fn default_max_single_ticker_exposure_pct() -> f64 {
    20.0
}

fn default_max_positions_open() -> u32 {
    5
}

fn default_daily_loss_limit_usd() -> f64 {
    300.0
}

fn default_daily_loss_limit_pct() -> f64 {
    3.0
}

fn default_min_trade_usd() -> f64 {
    50.0
}

fn default_max_trade_usd() -> f64 {
    5_000.0
}

fn default_commission_rate() -> f64 {
    0.001
}

// =============================================================================
// RiskConfig
// =============================================================================

/// File-backed limits. Every field carries a serde default so older files
/// keep loading as fields are added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_total_capital")]
    pub total_capital_usd: f64,

    #[serde(default = "default_max_position_usd")]
    pub max_position_usd: f64,

    #[serde(default = "default_max_portfolio_exposure_pct")]
    pub max_portfolio_exposure_pct: f64,

    #[serde(default = "default_max_single_ticker_exposure_pct")]
    pub max_single_ticker_exposure_pct: f64,

    #[serde(default = "default_max_positions_open")]
    pub max_positions_open: u32,

    #[serde(default = "default_daily_loss_limit_usd")]
    pub daily_loss_limit_usd: f64,

    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: f64,

    #[serde(default = "default_min_trade_usd")]
    pub min_trade_usd: f64,

    #[serde(default = "default_max_trade_usd")]
    pub max_trade_usd: f64,

    #[serde(default = "default_commission_rate")]
    pub commission_rate: f64,

    /// Whether entries are allowed during the pre-market session.
    #[serde(default)]
    pub allow_premarket: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

impl RiskConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(config) => {
                    info!(path = %path.display(), "risk config loaded");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "risk config unparseable — using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "no risk config file — using conservative defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("serialize risk config")?;
        std::fs::write(path.as_ref(), text).context("write risk config")?;
        Ok(())
    }

    /// The effective daily loss ceiling: the tighter of the USD and
    /// percentage limits.
    pub fn daily_loss_ceiling(&self) -> f64 {
        self.daily_loss_limit_usd
            .min(self.daily_loss_limit_pct / 100.0 * self.total_capital_usd)
    }
}

// =============================================================================
// Verdict + inputs
// =============================================================================

/// Structured allow/deny with the first failing reason.
#[derive(Debug, Clone, Serialize)]
pub struct RiskVerdict {
    pub allow: bool,
    pub reason: Option<String>,
}

impl RiskVerdict {
    fn allow() -> Self {
        Self {
            allow: true,
            reason: None,
        }
    }

    fn deny(reason: String) -> Self {
        warn!(reason = %reason, "risk check failed");
        Self {
            allow: false,
            reason: Some(reason),
        }
    }
}

/// Portfolio facts the executor gathers inside its transaction.
#[derive(Debug, Clone, Default)]
pub struct PortfolioExposure {
    /// Open (non-CASH, quantity > 0) position count.
    pub open_positions: u32,
    /// Cost-basis exposure across all open positions, USD.
    pub total_exposure_usd: f64,
    /// Cost-basis exposure in the candidate ticker, USD.
    pub ticker_exposure_usd: f64,
    /// Realized loss so far today, positive number, USD.
    pub realized_loss_today_usd: f64,
    /// Unrealized loss across open positions, positive number, USD.
    pub unrealized_loss_usd: f64,
}

// =============================================================================
// RiskManager
// =============================================================================

#[derive(Debug)]
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Run all six checks; the first failure wins.
    pub fn check_buy(
        &self,
        position_usd: f64,
        exposure: &PortfolioExposure,
        phase: SessionPhase,
    ) -> RiskVerdict {
        let c = &self.config;

        // 1. Trade size
        let max_size = c.max_position_usd.min(c.max_trade_usd);
        if position_usd < c.min_trade_usd || position_usd > max_size {
            return RiskVerdict::deny(format!(
                "position ${position_usd:.2} outside [{:.2}, {:.2}]",
                c.min_trade_usd, max_size
            ));
        }

        // 2. Portfolio exposure
        let portfolio_cap = c.max_portfolio_exposure_pct / 100.0 * c.total_capital_usd;
        if exposure.total_exposure_usd + position_usd > portfolio_cap {
            return RiskVerdict::deny(format!(
                "portfolio exposure ${:.2} + ${position_usd:.2} exceeds cap ${portfolio_cap:.2}",
                exposure.total_exposure_usd
            ));
        }

        // 3. Single-ticker exposure
        let ticker_cap = c.max_single_ticker_exposure_pct / 100.0 * c.total_capital_usd;
        if exposure.ticker_exposure_usd + position_usd > ticker_cap {
            return RiskVerdict::deny(format!(
                "ticker exposure ${:.2} + ${position_usd:.2} exceeds cap ${ticker_cap:.2}",
                exposure.ticker_exposure_usd
            ));
        }

        // 4. Position count
        if exposure.open_positions >= c.max_positions_open {
            return RiskVerdict::deny(format!(
                "{} open positions at the cap of {}",
                exposure.open_positions, c.max_positions_open
            ));
        }

        // 5. Trading hours
        let hours_ok = matches!(phase, SessionPhase::Regular)
            || (matches!(phase, SessionPhase::PreMarket) && c.allow_premarket);
        if !hours_ok {
            return RiskVerdict::deny(format!("outside trading hours (session {phase})"));
        }

        // 6. Daily loss
        let loss_today = exposure.realized_loss_today_usd + exposure.unrealized_loss_usd;
        let ceiling = c.daily_loss_ceiling();
        if loss_today >= ceiling {
            return RiskVerdict::deny(format!(
                "daily loss ${loss_today:.2} at/over limit ${ceiling:.2}"
            ));
        }

        RiskVerdict::allow()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RiskManager {
        RiskManager::new(RiskConfig::default())
    }

    fn clean_exposure() -> PortfolioExposure {
        PortfolioExposure::default()
    }

    #[test]
    fn defaults_are_conservative() {
        let c = RiskConfig::default();
        assert_eq!(c.total_capital_usd, 10_000.0);
        assert_eq!(c.max_positions_open, 5);
        assert!(!c.allow_premarket);
        // Ceiling is the tighter of $300 and 3% of $10k.
        assert_eq!(c.daily_loss_ceiling(), 300.0);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: RiskConfig =
            serde_json::from_str(r#"{ "total_capital_usd": 50000, "allow_premarket": true }"#)
                .unwrap();
        assert_eq!(c.total_capital_usd, 50_000.0);
        assert!(c.allow_premarket);
        assert_eq!(c.max_position_usd, 2_000.0);
    }

    #[test]
    fn happy_path_allows() {
        let verdict = manager().check_buy(1_000.0, &clean_exposure(), SessionPhase::Regular);
        assert!(verdict.allow);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn size_bounds_are_enforced() {
        let m = manager();
        assert!(!m.check_buy(10.0, &clean_exposure(), SessionPhase::Regular).allow);
        assert!(!m.check_buy(3_000.0, &clean_exposure(), SessionPhase::Regular).allow);
        assert!(m.check_buy(50.0, &clean_exposure(), SessionPhase::Regular).allow);
        assert!(m.check_buy(2_000.0, &clean_exposure(), SessionPhase::Regular).allow);
    }

    #[test]
    fn portfolio_exposure_cap() {
        let exposure = PortfolioExposure {
            total_exposure_usd: 5_500.0, // cap is 60% of 10k = 6000
            ..clean_exposure()
        };
        let verdict = manager().check_buy(1_000.0, &exposure, SessionPhase::Regular);
        assert!(!verdict.allow);
        assert!(verdict.reason.unwrap().contains("portfolio exposure"));
    }

    #[test]
    fn ticker_exposure_cap() {
        let exposure = PortfolioExposure {
            ticker_exposure_usd: 1_500.0, // cap is 20% of 10k = 2000
            ..clean_exposure()
        };
        let verdict = manager().check_buy(600.0, &exposure, SessionPhase::Regular);
        assert!(!verdict.allow);
        assert!(verdict.reason.unwrap().contains("ticker exposure"));
    }

    #[test]
    fn position_count_cap() {
        let exposure = PortfolioExposure {
            open_positions: 5,
            ..clean_exposure()
        };
        assert!(!manager().check_buy(500.0, &exposure, SessionPhase::Regular).allow);
    }

    #[test]
    fn trading_hours_gate() {
        let m = manager();
        assert!(!m.check_buy(500.0, &clean_exposure(), SessionPhase::Closed).allow);
        assert!(!m.check_buy(500.0, &clean_exposure(), SessionPhase::PostMarket).allow);
        // Pre-market denied by default, allowed when configured.
        assert!(!m.check_buy(500.0, &clean_exposure(), SessionPhase::PreMarket).allow);

        let open = RiskManager::new(RiskConfig {
            allow_premarket: true,
            ..RiskConfig::default()
        });
        assert!(open.check_buy(500.0, &clean_exposure(), SessionPhase::PreMarket).allow);
    }

    #[test]
    fn daily_loss_gate_counts_unrealized() {
        let exposure = PortfolioExposure {
            realized_loss_today_usd: 200.0,
            unrealized_loss_usd: 150.0,
            ..clean_exposure()
        };
        let verdict = manager().check_buy(500.0, &exposure, SessionPhase::Regular);
        assert!(!verdict.allow);
        assert!(verdict.reason.unwrap().contains("daily loss"));
    }

    #[test]
    fn check_order_reports_first_failure() {
        // Oversized AND over-exposed: the size failure must win.
        let exposure = PortfolioExposure {
            total_exposure_usd: 9_000.0,
            ..clean_exposure()
        };
        let verdict = manager().check_buy(9_999.0, &exposure, SessionPhase::Regular);
        assert!(verdict.reason.unwrap().contains("outside ["));
    }
}
