use serde::Serialize;

use crate::config::SellSettings;
use crate::signals::series::{fell_below_after_above, stoch_cross_down, stoch_series};
use crate::types::MarketSnapshot;

/// Take-profit detection. Event flags require "was overbought, then fell
/// back" inside the lookback window; state flags only say whether the
/// market is currently in the overbought zone. Callers use the distinction
/// to tell "still hot" apart from "just turned".
#[derive(Debug, Clone, Serialize)]
pub struct SellSignalReport {
    pub rsi_sell: bool,
    pub macd_sell: bool,
    pub stoch_sell: bool,
    pub signal_count: usize,
    pub factor_count: usize,
    pub rsi_state_overbought: bool,
    pub stoch_state_overbought: bool,
    pub state_count: usize,
}

impl SellSignalReport {
    pub fn compute(snapshot: &MarketSnapshot, sell: &SellSettings, lookback: usize) -> Self {
        let rsi_state_overbought = snapshot
            .last_rsi()
            .map(|v| v >= sell.rsi_overbought)
            .unwrap_or(false);
        let stoch_state_overbought = snapshot
            .last_stoch()
            .map(|p| p.d >= sell.stoch_overbought_k)
            .unwrap_or(false);

        // 1) RSI pushed above overbought and fell back today
        let rsi_sell =
            fell_below_after_above(&snapshot.rsi, sell.rsi_overbought, lookback, true);

        // 2) MACD difference turning from positive to non-positive
        let macd_diff = snapshot
            .macd
            .iter()
            .map(|p| p.macd - p.signal)
            .collect::<Vec<_>>();
        let macd_sell =
            fell_below_after_above(&macd_diff, rust_decimal::Decimal::ZERO, lookback, true);

        // 3) stochastic high-then-weak: bearish cross while jointly
        //    overbought, or %D dropping back through the threshold
        let stoch_sell = {
            let cross_down = stoch_cross_down(&snapshot.stochastic);
            let jointly_overbought = snapshot
                .last_stoch()
                .map(|p| p.min_kd() >= sell.stoch_overbought_k)
                .unwrap_or(false);

            let d_series = stoch_series(&snapshot.stochastic, |p| p.d);
            let d_fell_back =
                fell_below_after_above(&d_series, sell.stoch_overbought_k, lookback, true);

            (cross_down && jointly_overbought) || d_fell_back
        };

        let signal_count = [rsi_sell, macd_sell, stoch_sell]
            .iter()
            .filter(|f| **f)
            .count();
        let state_count = [rsi_state_overbought, stoch_state_overbought]
            .iter()
            .filter(|f| **f)
            .count();

        Self {
            rsi_sell,
            macd_sell,
            stoch_sell,
            signal_count,
            factor_count: 3,
            rsi_state_overbought,
            stoch_state_overbought,
            state_count,
        }
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
                leveraged: dec!(70),
                base_price: dec!(50),
            },
            rsi: vec![dec!(60), dec!(60)],
            macd: vec![
                MacdPoint { macd: dec!(0.2), signal: dec!(0.1), histogram: dec!(0.1) },
                MacdPoint { macd: dec!(0.2), signal: dec!(0.1), histogram: dec!(0.1) },
            ],
            stochastic: vec![
                StochPoint { k: dec!(60), d: dec!(60) },
                StochPoint { k: dec!(60), d: dec!(60) },
            ],
            long_ma_bias_pct: None,
            vix: None,
            is_rebalance_checkpoint: false,
        }
    }

    #[test]
    fn test_rsi_overbought_then_falling_fires() {
        let sell = SellSettings::default();
        let mut snapshot = base_snapshot();
        snapshot.rsi = vec![dec!(78), dec!(72)];

        let report = SellSignalReport::compute(&snapshot, &sell, 10);
        assert!(report.rsi_sell);
        assert!(!report.rsi_state_overbought);
    }

    #[test]
    fn test_currently_overbought_is_state_not_event() {
        let sell = SellSettings::default();
        let mut snapshot = base_snapshot();
        snapshot.rsi = vec![dec!(76), dec!(79)];

        let report = SellSignalReport::compute(&snapshot, &sell, 10);
        assert!(!report.rsi_sell, "still climbing, no sell event yet");
        assert!(report.rsi_state_overbought);
    }

    #[test]
    fn test_macd_difference_turning_negative() {
        let sell = SellSettings::default();
        let mut snapshot = base_snapshot();
        snapshot.macd = vec![
            MacdPoint { macd: dec!(0.3), signal: dec!(0.1), histogram: dec!(0.2) },
            MacdPoint { macd: dec!(0.1), signal: dec!(0.2), histogram: dec!(-0.1) },
        ];

        let report = SellSignalReport::compute(&snapshot, &sell, 10);
        assert!(report.macd_sell);
    }

    #[test]
    fn test_stoch_bearish_cross_in_overbought_zone() {
        let sell = SellSettings::default();
        let mut snapshot = base_snapshot();
        snapshot.stochastic = vec![
            StochPoint { k: dec!(92), d: dec!(88) },
            StochPoint { k: dec!(84), d: dec!(86) },
        ];

        let report = SellSignalReport::compute(&snapshot, &sell, 10);
        assert!(report.stoch_sell);
        assert!(report.stoch_state_overbought);
    }

    #[test]
    fn test_quiet_market_counts_zero() {
        let sell = SellSettings::default();
        let report = SellSignalReport::compute(&base_snapshot(), &sell, 10);
        assert_eq!(report.signal_count, 0);
        assert_eq!(report.state_count, 0);
    }
}
