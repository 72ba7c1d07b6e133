// =============================================================================
// Neutral — the fallback regime: no edge, no position
// =============================================================================

use crate::strategy::{MarketState, Regime, Strategy, StrategySignal};
use crate::types::TradeSignal;

pub struct Neutral;

impl Strategy for Neutral {
    fn regime(&self) -> Regime {
        Regime::Neutral
    }

    fn is_suitable(&self, _state: &MarketState) -> bool {
        true
    }

    fn calculate_signal(&self, state: &MarketState) -> StrategySignal {
        StrategySignal {
            signal: TradeSignal::Hold,
            confidence: 0.3,
            entry_price: state.close,
            stop_pct: 0.0,
            target_pct: 0.0,
            reason: "no regime matched current conditions".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_state;

    #[test]
    fn always_holds() {
        let signal = Neutral.calculate_signal(&test_state());
        assert_eq!(signal.signal, TradeSignal::Hold);
        assert!(Neutral.is_suitable(&test_state()));
    }
}
