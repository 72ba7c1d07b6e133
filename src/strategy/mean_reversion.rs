// =============================================================================
// MeanReversion — stretched price in choppy tape, news roughly neutral
// =============================================================================

use crate::strategy::{MarketState, Regime, Strategy, StrategySignal};
use crate::types::TradeSignal;

const STOP_PCT: f64 = 5.0;
const TARGET_PCT: f64 = 4.0;
const MIN_DEVIATION: f64 = 0.02;
const SENTIMENT_LOW: f64 = 0.30;
const SENTIMENT_HIGH: f64 = 0.70;

pub struct MeanReversion;

impl Strategy for MeanReversion {
    fn regime(&self) -> Regime {
        Regime::MeanReversion
    }

    /// Price more than 2 % away from its 5-day mean, volatility elevated,
    /// and sentiment inside the neutral band (a strongly directional story
    /// is not a stretch to fade).
    fn is_suitable(&self, state: &MarketState) -> bool {
        let (Some(sma), Some(vol), Some(avg_vol)) =
            (state.sma_5, state.volatility_5, state.avg_volatility_20)
        else {
            return false;
        };
        if sma <= 0.0 {
            return false;
        }
        let deviation = (state.close - sma).abs() / sma;
        deviation > MIN_DEVIATION
            && vol > avg_vol
            && (SENTIMENT_LOW..=SENTIMENT_HIGH).contains(&state.sentiment)
    }

    fn calculate_signal(&self, state: &MarketState) -> StrategySignal {
        let sma = state.sma_5.unwrap_or(state.close);
        let deviation_pct = if sma > 0.0 {
            (state.close - sma) / sma * 100.0
        } else {
            0.0
        };

        // Fade the stretch: below the mean is a long, above is an exit.
        let signal = if state.close < sma {
            TradeSignal::Buy
        } else {
            TradeSignal::Sell
        };

        let confidence = (0.4 + deviation_pct.abs().min(8.0) / 20.0).clamp(0.0, 1.0);

        StrategySignal {
            signal,
            confidence,
            entry_price: state.close,
            stop_pct: STOP_PCT,
            target_pct: TARGET_PCT,
            reason: format!(
                "price {deviation_pct:+.2}% off SMA5 with elevated volatility, sentiment {:.2}",
                state.sentiment
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_state;

    fn stretched() -> MarketState {
        MarketState {
            close: 120.0,
            sma_5: Some(125.0),
            volatility_5: Some(4.0),
            avg_volatility_20: Some(2.5),
            sentiment: 0.45,
            ..test_state()
        }
    }

    #[test]
    fn suitability_bounds() {
        assert!(MeanReversion.is_suitable(&stretched()));

        // 1% deviation is not stretched enough.
        let tight = MarketState { close: 124.0, ..stretched() };
        assert!(!MeanReversion.is_suitable(&tight));

        // Calm volatility disqualifies.
        let calm = MarketState { volatility_5: Some(2.0), ..stretched() };
        assert!(!MeanReversion.is_suitable(&calm));

        // Sentiment band is inclusive at both ends.
        assert!(MeanReversion.is_suitable(&MarketState { sentiment: 0.30, ..stretched() }));
        assert!(MeanReversion.is_suitable(&MarketState { sentiment: 0.70, ..stretched() }));
        assert!(!MeanReversion.is_suitable(&MarketState { sentiment: 0.29, ..stretched() }));
        assert!(!MeanReversion.is_suitable(&MarketState { sentiment: 0.71, ..stretched() }));
    }

    #[test]
    fn fades_toward_the_mean() {
        let below = MeanReversion.calculate_signal(&stretched());
        assert_eq!(below.signal, TradeSignal::Buy);

        let above = MeanReversion.calculate_signal(&MarketState {
            close: 130.0,
            ..stretched()
        });
        assert_eq!(above.signal, TradeSignal::Sell);
        assert_eq!(above.stop_pct, 5.0);
        assert_eq!(above.target_pct, 4.0);
    }
}
