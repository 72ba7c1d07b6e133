// =============================================================================
// Strategy selector — four regimes behind one stateless trait
// =============================================================================
//
// Regimes are evaluated in a fixed order (Momentum, MeanReversion,
// VolatileGap); the first whose suitability predicate matches wins, and
// Neutral is the unconditional fallback. Implementations hold no mutable
// state, so the selector is a pure function of the market snapshot and
// adding a regime never touches the others.
// =============================================================================

pub mod mean_reversion;
pub mod momentum;
pub mod neutral;
pub mod volatile_gap;

use serde::{Deserialize, Serialize};

use crate::types::TradeSignal;

pub use mean_reversion::MeanReversion;
pub use momentum::Momentum;
pub use neutral::Neutral;
pub use volatile_gap::VolatileGap;

/// Snapshot of everything a suitability predicate may look at.
#[derive(Debug, Clone)]
pub struct MarketState {
    pub ticker: String,
    pub close: f64,
    pub sma_5: Option<f64>,
    pub volatility_5: Option<f64>,
    pub avg_volatility_20: Option<f64>,
    pub rsi: Option<f64>,
    pub news_count: usize,
    pub has_macro_news: bool,
    /// Weighted sentiment in [0,1]; 0.5 when no news is in window.
    pub sentiment: f64,
}

/// What a regime proposes for the instrument.
#[derive(Debug, Clone, Serialize)]
pub struct StrategySignal {
    pub signal: TradeSignal,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_pct: f64,
    pub target_pct: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Momentum,
    MeanReversion,
    VolatileGap,
    Neutral,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Momentum => "Momentum",
            Self::MeanReversion => "MeanReversion",
            Self::VolatileGap => "VolatileGap",
            Self::Neutral => "Neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Momentum" => Some(Self::Momentum),
            "MeanReversion" => Some(Self::MeanReversion),
            "VolatileGap" => Some(Self::VolatileGap),
            "Neutral" => Some(Self::Neutral),
            _ => None,
        }
    }

    /// Exit parameters (stop %, target %) for positions opened under this
    /// regime. Neutral never opens positions.
    pub fn stop_target(&self) -> Option<(f64, f64)> {
        match self {
            Self::Momentum => Some((3.0, 8.0)),
            Self::MeanReversion => Some((5.0, 4.0)),
            Self::VolatileGap => Some((7.0, 12.0)),
            Self::Neutral => None,
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trading regime: a suitability predicate plus a signal calculator.
pub trait Strategy: Send + Sync {
    fn regime(&self) -> Regime;
    fn is_suitable(&self, state: &MarketState) -> bool;
    fn calculate_signal(&self, state: &MarketState) -> StrategySignal;
}

/// Pick the first suitable regime in declaration order.
pub fn select(state: &MarketState) -> (Regime, StrategySignal) {
    let strategies: [&dyn Strategy; 3] = [&Momentum, &MeanReversion, &VolatileGap];

    for strategy in strategies {
        if strategy.is_suitable(state) {
            return (strategy.regime(), strategy.calculate_signal(state));
        }
    }
    (Regime::Neutral, Neutral.calculate_signal(state))
}

#[cfg(test)]
pub(crate) fn test_state() -> MarketState {
    MarketState {
        ticker: "MSFT".into(),
        close: 350.0,
        sma_5: Some(345.0),
        volatility_5: Some(2.5),
        avg_volatility_20: Some(3.0),
        rsi: Some(55.0),
        news_count: 1,
        has_macro_news: false,
        sentiment: 0.8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn momentum_seed_scenario() {
        // close=350, sma=345, vol=2.5 <= avg 3.0, sentiment 0.8.
        let state = test_state();
        let (regime, signal) = select(&state);
        assert_eq!(regime, Regime::Momentum);
        assert_eq!(signal.stop_pct, 3.0);
        assert_eq!(signal.target_pct, 8.0);
        assert_eq!(signal.signal, TradeSignal::StrongBuy);
        assert_eq!(signal.entry_price, 350.0);
    }

    #[test]
    fn mean_reversion_seed_scenario() {
        // close=120 vs sma=125 (−4%), vol 4.0 > avg 2.5, sentiment 0.45.
        let state = MarketState {
            close: 120.0,
            sma_5: Some(125.0),
            volatility_5: Some(4.0),
            avg_volatility_20: Some(2.5),
            sentiment: 0.45,
            ..test_state()
        };
        let (regime, signal) = select(&state);
        assert_eq!(regime, Regime::MeanReversion);
        assert_eq!(signal.stop_pct, 5.0);
        assert_eq!(signal.target_pct, 4.0);
    }

    #[test]
    fn volatile_gap_seed_scenario() {
        // vol 6 > 1.5 × 3, bearish macro news at 0.15.
        let state = MarketState {
            close: 100.0,
            sma_5: Some(101.0),
            volatility_5: Some(6.0),
            avg_volatility_20: Some(3.0),
            sentiment: 0.15,
            has_macro_news: true,
            ..test_state()
        };
        let (regime, signal) = select(&state);
        assert_eq!(regime, Regime::VolatileGap);
        assert_eq!(signal.stop_pct, 7.0);
        assert_eq!(signal.target_pct, 12.0);
        assert_eq!(signal.signal, TradeSignal::Sell);
    }

    #[test]
    fn neutral_when_nothing_matches() {
        let state = MarketState {
            close: 100.0,
            sma_5: Some(100.5),
            volatility_5: Some(3.0),
            avg_volatility_20: Some(3.0),
            sentiment: 0.5,
            ..test_state()
        };
        // close < sma → no momentum; |gap| < 2% → no mean reversion;
        // vol ratio 1.0 → no volatile gap.
        let (regime, signal) = select(&state);
        assert_eq!(regime, Regime::Neutral);
        assert_eq!(signal.signal, TradeSignal::Hold);
    }

    #[test]
    fn missing_indicators_fall_through_to_neutral() {
        let state = MarketState {
            sma_5: None,
            volatility_5: None,
            avg_volatility_20: None,
            ..test_state()
        };
        let (regime, _) = select(&state);
        assert_eq!(regime, Regime::Neutral);
    }

    #[test]
    fn tie_break_order_is_declaration_order() {
        // A state satisfying both MeanReversion and VolatileGap resolves to
        // MeanReversion (listed earlier): stretched 3 %, vol 5 > 1.5 × 3,
        // neutral-band sentiment, macro news present.
        let state = MarketState {
            close: 97.0,
            sma_5: Some(100.0),
            volatility_5: Some(5.0),
            avg_volatility_20: Some(3.0),
            sentiment: 0.6,
            has_macro_news: true,
            ..test_state()
        };
        assert!(MeanReversion.is_suitable(&state));
        assert!(VolatileGap.is_suitable(&state));
        let (regime, _) = select(&state);
        assert_eq!(regime, Regime::MeanReversion);
    }

    #[test]
    fn regime_roundtrip_and_exit_params() {
        for r in [
            Regime::Momentum,
            Regime::MeanReversion,
            Regime::VolatileGap,
            Regime::Neutral,
        ] {
            assert_eq!(Regime::parse(r.as_str()), Some(r));
        }
        assert_eq!(Regime::Momentum.stop_target(), Some((3.0, 8.0)));
        assert_eq!(Regime::Neutral.stop_target(), None);
    }
}
