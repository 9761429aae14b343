use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::BuySettings;
use crate::signals::series::{
    macd_cross_up, rose_above_after_below, stoch_cross_up, stoch_series, was_below_level,
};
use crate::types::MarketSnapshot;

/// One scored component, kept for audit output.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreComponent {
    pub label: String,
    pub triggered: bool,
    pub points: i32,
}

/// Additive entry score: drop-magnitude rule plus three independent
/// reversal events. No component interacts with another.
#[derive(Debug, Clone, Serialize)]
pub struct EntryScore {
    pub total: i32,
    pub components: Vec<ScoreComponent>,
}

impl EntryScore {
    pub fn compute(
        snapshot: &MarketSnapshot,
        drop_pct: Decimal,
        buy: &BuySettings,
        lookback: usize,
    ) -> Self {
        // First rule with the greatest threshold still covered by the drop;
        // rules are validated to be sorted descending.
        let drop_rule = buy.drop_rules.iter().find(|r| drop_pct >= r.min_drop);
        let (drop_label, drop_points) = match drop_rule {
            Some(rule) => (rule.label.clone(), rule.score),
            None => (format!("drop {:.2}%", drop_pct), 0),
        };

        let rsi_rebound =
            rose_above_after_below(&snapshot.rsi, buy.rsi.oversold, lookback, false);

        let macd_bull = macd_cross_up(&snapshot.macd);

        let k_series = stoch_series(&snapshot.stochastic, |p| p.k);
        let stoch_bull_low = stoch_cross_up(&snapshot.stochastic)
            && was_below_level(&k_series, buy.stochastic.oversold_k, lookback);

        let components = vec![
            ScoreComponent {
                label: drop_label,
                triggered: drop_rule.is_some(),
                points: drop_points,
            },
            ScoreComponent {
                label: format!("RSI rebound above {}", buy.rsi.oversold),
                triggered: rsi_rebound,
                points: if rsi_rebound { buy.rsi.score } else { 0 },
            },
            ScoreComponent {
                label: "MACD bullish cross".to_string(),
                triggered: macd_bull,
                points: if macd_bull { buy.macd.score } else { 0 },
            },
            ScoreComponent {
                label: format!("stochastic cross below {}", buy.stochastic.oversold_k),
                triggered: stoch_bull_low,
                points: if stoch_bull_low { buy.stochastic.score } else { 0 },
            },
        ];

        let total = components.iter().map(|c| c.points).sum();
        Self { total, components }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetPrices, MacdPoint, StochPoint};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn quiet_snapshot() -> MarketSnapshot {
        MarketSnapshot {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            prices: AssetPrices {
                collateral: dec!(100),
                leveraged: dec!(50),
                base_price: dec!(50),
            },
            rsi: vec![dec!(50), dec!(50)],
            macd: vec![
                MacdPoint { macd: dec!(0.2), signal: dec!(0.3), histogram: dec!(-0.1) },
                MacdPoint { macd: dec!(0.2), signal: dec!(0.3), histogram: dec!(-0.1) },
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
    fn test_drop_rule_greatest_threshold_wins() {
        let buy = BuySettings::default();
        let snapshot = quiet_snapshot();
        // 32% drop matches the 30% rule (score 4), not the 20% rule
        let score = EntryScore::compute(&snapshot, dec!(32), &buy, 10);
        assert_eq!(score.total, 4);
        assert_eq!(score.components[0].points, 4);
    }

    #[test]
    fn test_no_drop_rule_scores_zero() {
        let buy = BuySettings::default();
        let score = EntryScore::compute(&quiet_snapshot(), dec!(5), &buy, 10);
        assert_eq!(score.total, 0);
        assert!(!score.components[0].triggered);
    }

    #[test]
    fn test_lower_rule_change_does_not_affect_higher_drop() {
        let mut buy = BuySettings::default();
        let before = EntryScore::compute(&quiet_snapshot(), dec!(32), &buy, 10).total;
        // tweak the 10% rule; a 32% drop must not care
        buy.drop_rules.last_mut().unwrap().score = 1;
        let after = EntryScore::compute(&quiet_snapshot(), dec!(32), &buy, 10).total;
        assert_eq!(before, after);
    }

    #[test]
    fn test_components_add_independently() {
        let buy = BuySettings::default();
        let mut snapshot = quiet_snapshot();
        snapshot.rsi = vec![dec!(26), dec!(33)];
        snapshot.macd = vec![
            MacdPoint { macd: dec!(-0.4), signal: dec!(-0.2), histogram: dec!(-0.2) },
            MacdPoint { macd: dec!(0.1), signal: dec!(-0.05), histogram: dec!(0.15) },
        ];
        snapshot.stochastic = vec![
            StochPoint { k: dec!(18), d: dec!(24) },
            StochPoint { k: dec!(28), d: dec!(25) },
        ];

        // drop 32% (4) + RSI rebound (2) + MACD (2) + stochastic (2)
        let score = EntryScore::compute(&snapshot, dec!(32), &buy, 10);
        assert_eq!(score.total, 10);
        assert!(score.components.iter().all(|c| c.triggered));
    }
}
