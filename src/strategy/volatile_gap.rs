// =============================================================================
// VolatileGap — volatility expansion on a macro shock or an extreme story
// =============================================================================

use crate::strategy::{MarketState, Regime, Strategy, StrategySignal};
use crate::types::TradeSignal;

const STOP_PCT: f64 = 7.0;
const TARGET_PCT: f64 = 12.0;
const VOL_EXPANSION: f64 = 1.5;
const EXTREME_BULL: f64 = 0.8;
const EXTREME_BEAR: f64 = 0.2;

pub struct VolatileGap;

impl Strategy for VolatileGap {
    fn regime(&self) -> Regime {
        Regime::VolatileGap
    }

    /// Volatility at least 1.5× its 20-day average, with either fresh macro
    /// news or an extreme sentiment reading.
    fn is_suitable(&self, state: &MarketState) -> bool {
        let (Some(vol), Some(avg_vol)) = (state.volatility_5, state.avg_volatility_20) else {
            return false;
        };
        vol > VOL_EXPANSION * avg_vol
            && (state.has_macro_news
                || state.sentiment > EXTREME_BULL
                || state.sentiment < EXTREME_BEAR)
    }

    fn calculate_signal(&self, state: &MarketState) -> StrategySignal {
        let vol_ratio = match (state.volatility_5, state.avg_volatility_20) {
            (Some(v), Some(a)) if a > 0.0 => v / a,
            _ => VOL_EXPANSION,
        };

        let signal = if state.sentiment > EXTREME_BULL {
            TradeSignal::StrongBuy
        } else if state.sentiment < EXTREME_BEAR {
            TradeSignal::Sell
        } else if state.sentiment >= 0.5 {
            TradeSignal::Buy
        } else {
            TradeSignal::Sell
        };

        let confidence = (0.35 + (vol_ratio - VOL_EXPANSION).max(0.0) / 4.0
            + (state.sentiment - 0.5).abs() / 2.0)
            .clamp(0.0, 1.0);

        StrategySignal {
            signal,
            confidence,
            entry_price: state.close,
            stop_pct: STOP_PCT,
            target_pct: TARGET_PCT,
            reason: format!(
                "volatility {vol_ratio:.2}x its 20-day average, macro_news={}, sentiment {:.2}",
                state.has_macro_news, state.sentiment
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_state;

    fn shocked() -> MarketState {
        MarketState {
            volatility_5: Some(6.0),
            avg_volatility_20: Some(3.0),
            sentiment: 0.15,
            has_macro_news: true,
            ..test_state()
        }
    }

    #[test]
    fn needs_expansion_plus_a_trigger() {
        assert!(VolatileGap.is_suitable(&shocked()));

        // Expansion alone, neutral story, no macro: unsuitable.
        let quiet_story = MarketState {
            sentiment: 0.5,
            has_macro_news: false,
            ..shocked()
        };
        assert!(!VolatileGap.is_suitable(&quiet_story));

        // Extreme sentiment alone is a trigger.
        let euphoric = MarketState {
            sentiment: 0.85,
            has_macro_news: false,
            ..shocked()
        };
        assert!(VolatileGap.is_suitable(&euphoric));

        // 1.5x is exclusive: exactly at the line is not an expansion.
        let at_line = MarketState {
            volatility_5: Some(4.5),
            ..shocked()
        };
        assert!(!VolatileGap.is_suitable(&at_line));
    }

    #[test]
    fn direction_follows_the_extreme() {
        let bearish = VolatileGap.calculate_signal(&shocked());
        assert_eq!(bearish.signal, TradeSignal::Sell);
        assert_eq!(bearish.stop_pct, 7.0);
        assert_eq!(bearish.target_pct, 12.0);

        let bullish = VolatileGap.calculate_signal(&MarketState {
            sentiment: 0.9,
            ..shocked()
        });
        assert_eq!(bullish.signal, TradeSignal::StrongBuy);
    }
}
