use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::ThresholdSettings;
use crate::types::MarketSnapshot;

/// Majority-vote rally detector over RSI, stochastic %D, and long-MA bias.
/// Per-factor booleans are kept so callers can report unblock progress.
#[derive(Debug, Clone, Serialize)]
pub struct OverheatReport {
    pub is_overheat: bool,
    pub rsi_hot: bool,
    pub stoch_hot: bool,
    pub bias_hot: bool,
    pub hot_count: usize,
    pub factor_count: usize,
}

impl OverheatReport {
    pub fn compute(snapshot: &MarketSnapshot, th: &ThresholdSettings) -> Self {
        let rsi_hot = snapshot
            .last_rsi()
            .map(|v| v > th.rsi_overheat_level)
            .unwrap_or(false);
        let stoch_hot = snapshot
            .last_stoch()
            .map(|p| p.d > th.stoch_d_overheat_level)
            .unwrap_or(false);
        let bias_hot = snapshot
            .long_ma_bias_pct
            .map(|b| b > th.bias_overheat_level)
            .unwrap_or(false);

        let hot_count = [rsi_hot, stoch_hot, bias_hot].iter().filter(|f| **f).count();

        Self {
            is_overheat: hot_count >= th.overheat_count,
            rsi_hot,
            stoch_hot,
            bias_hot,
            hot_count,
            factor_count: 3,
        }
    }

    /// How many factors have cooled, for "N of 3 cooled" messaging.
    pub fn cooled_count(&self) -> usize {
        self.factor_count - self.hot_count
    }
}

/// Keep the audit output compact.
pub fn factor_mark(hot: bool) -> &'static str {
    if hot {
        "hot"
    } else {
        "ok"
    }
}

pub fn describe(report: &OverheatReport, th: &ThresholdSettings) -> String {
    format!(
        "cooled {}/{} | RSI>{} {} | %D>{} {} | bias>{} {}",
        report.cooled_count(),
        report.factor_count,
        th.rsi_overheat_level,
        factor_mark(report.rsi_hot),
        th.stoch_d_overheat_level,
        factor_mark(report.stoch_hot),
        th.bias_overheat_level,
        factor_mark(report.bias_hot),
    )
}
