use serde::Serialize;

use crate::config::ThresholdSettings;
use crate::signals::series::{
    fell_below_after_above, macd_cross_down, stoch_cross_down, stoch_series,
};
use crate::types::MarketSnapshot;

/// Event-based weakening triggers. Four independent checks; enough of them
/// firing pauses accumulation even without a full overheat.
#[derive(Debug, Clone, Serialize)]
pub struct ReversalReport {
    pub rsi_drop: bool,
    pub stoch_drop: bool,
    pub stoch_bear_cross: bool,
    pub macd_bear_cross: bool,
    pub triggered_count: usize,
    pub factor_count: usize,
}

impl ReversalReport {
    pub fn compute(snapshot: &MarketSnapshot, th: &ThresholdSettings, lookback: usize) -> Self {
        let rsi_drop =
            fell_below_after_above(&snapshot.rsi, th.rsi_reversal_level, lookback, false);

        // Conservative stochastic reading: min(%K, %D) falling back through
        // the reversal level.
        let min_kd = stoch_series(&snapshot.stochastic, |p| p.min_kd());
        let stoch_drop =
            fell_below_after_above(&min_kd, th.stoch_reversal_level, lookback, false);

        let stoch_bear_cross = stoch_cross_down(&snapshot.stochastic);
        let macd_bear_cross = macd_cross_down(&snapshot.macd);

        let triggered_count = [rsi_drop, stoch_drop, stoch_bear_cross, macd_bear_cross]
            .iter()
            .filter(|f| **f)
            .count();

        Self {
            rsi_drop,
            stoch_drop,
            stoch_bear_cross,
            macd_bear_cross,
            triggered_count,
            factor_count: 4,
        }
    }

    pub fn should_pause(&self, th: &ThresholdSettings) -> bool {
        self.triggered_count >= th.reversal_trigger_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetPrices, MacdPoint, StochPoint};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn base_snapshot() -> MarketSnapshot {
        MarketSnapshot {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            prices: AssetPrices {
                collateral: dec!(100),
                leveraged: dec!(50),
                base_price: dec!(50),
            },
            rsi: vec![dec!(50), dec!(50)],
            macd: vec![
                MacdPoint { macd: dec!(0.1), signal: dec!(0.0), histogram: dec!(0.1) },
                MacdPoint { macd: dec!(0.1), signal: dec!(0.0), histogram: dec!(0.1) },
            ],
            stochastic: vec![
                StochPoint { k: dec!(50), d: dec!(50) },
                StochPoint { k: dec!(50), d: dec!(50) },
            ],
            long_ma_bias_pct: None,
            vix: None,
            is_rebalance_checkpoint: false,
        }
    }

    #[test]
    fn test_quiet_market_triggers_nothing() {
        let th = ThresholdSettings::default();
        let report = ReversalReport::compute(&base_snapshot(), &th, 10);
        assert_eq!(report.triggered_count, 0);
        assert!(!report.should_pause(&th));
    }

    #[test]
    fn test_rsi_and_macd_weakening_pauses() {
        let th = ThresholdSettings::default();
        let mut snapshot = base_snapshot();
        // RSI was above 60, now below
        snapshot.rsi = vec![dec!(66), dec!(57)];
        // MACD fast line drops through signal
        snapshot.macd = vec![
            MacdPoint { macd: dec!(0.3), signal: dec!(0.2), histogram: dec!(0.1) },
            MacdPoint { macd: dec!(0.1), signal: dec!(0.2), histogram: dec!(-0.1) },
        ];

        let report = ReversalReport::compute(&snapshot, &th, 10);
        assert!(report.rsi_drop);
        assert!(report.macd_bear_cross);
        assert_eq!(report.triggered_count, 2);
        assert!(report.should_pause(&th));
    }

    #[test]
    fn test_stoch_drop_uses_conservative_min_kd() {
        let th = ThresholdSettings::default();
        let mut snapshot = base_snapshot();
        // min(K, D) was 78 (above 70), now 64
        snapshot.stochastic = vec![
            StochPoint { k: dec!(80), d: dec!(78) },
            StochPoint { k: dec!(64), d: dec!(69) },
        ];

        let report = ReversalReport::compute(&snapshot, &th, 10);
        assert!(report.stoch_drop);
        assert!(report.stoch_bear_cross);
    }
}
