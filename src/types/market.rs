use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One point of the MACD series as supplied by the indicator feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdPoint {
    pub macd: Decimal,
    pub signal: Decimal,
    pub histogram: Decimal,
}

/// One point of the stochastic (%K/%D) series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StochPoint {
    pub k: Decimal,
    pub d: Decimal,
}

impl StochPoint {
    /// Conservative reading: the weaker of %K and %D.
    pub fn min_kd(&self) -> Decimal {
        self.k.min(self.d)
    }
}

/// Current prices for the two assets plus the reference base price
/// (the last rebalance anchor the drop/rise percentage is measured from).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AssetPrices {
    pub collateral: Decimal,
    pub leveraged: Decimal,
    pub base_price: Decimal,
}

/// Read-only market input for one evaluation cycle. Prices and indicator
/// series arrive already resolved from the external feed; the engine never
/// fetches or computes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub date: NaiveDate,
    pub prices: AssetPrices,
    pub rsi: Vec<Decimal>,
    pub macd: Vec<MacdPoint>,
    pub stochastic: Vec<StochPoint>,
    /// Deviation of the leveraged price from its long moving average, in %.
    pub long_ma_bias_pct: Option<Decimal>,
    pub vix: Option<Decimal>,
    /// Whether this cycle falls on a scheduled rebalance review date.
    #[serde(default)]
    pub is_rebalance_checkpoint: bool,
}

impl MarketSnapshot {
    /// Crossover checks need at least two bars of every series. Anything
    /// shorter is reported as insufficient data rather than treated as zero.
    pub fn has_min_history(&self) -> bool {
        self.rsi.len() >= 2 && self.macd.len() >= 2 && self.stochastic.len() >= 2
    }

    pub fn last_rsi(&self) -> Option<Decimal> {
        self.rsi.last().copied()
    }

    pub fn last_stoch(&self) -> Option<StochPoint> {
        self.stochastic.last().copied()
    }

    /// Signed change vs. the base price, in percent.
    pub fn price_change_pct(&self) -> Decimal {
        if self.prices.base_price.is_zero() {
            return Decimal::ZERO;
        }
        (self.prices.leveraged - self.prices.base_price) / self.prices.base_price
            * Decimal::from(100)
    }

    pub fn price_drop_pct(&self) -> Decimal {
        (-self.price_change_pct()).max(Decimal::ZERO)
    }

    pub fn price_up_pct(&self) -> Decimal {
        self.price_change_pct().max(Decimal::ZERO)
    }
}

/// Valuation band derived from the long-MA bias, reported on every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValuationBand {
    Cheap,
    Mid,
    Expensive,
    Extreme,
    Unknown,
}

impl ValuationBand {
    pub fn from_bias(bias: Option<Decimal>) -> Self {
        match bias {
            None => ValuationBand::Unknown,
            Some(b) if b > Decimal::from(25) => ValuationBand::Extreme,
            Some(b) if b > Decimal::from(15) => ValuationBand::Expensive,
            Some(b) if b < Decimal::ZERO => ValuationBand::Cheap,
            Some(_) => ValuationBand::Mid,
        }
    }
}

impl std::fmt::Display for ValuationBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValuationBand::Cheap => "cheap",
            ValuationBand::Mid => "mid-range",
            ValuationBand::Expensive => "expensive",
            ValuationBand::Extreme => "extreme",
            ValuationBand::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot_with_base(base: Decimal, current: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            prices: AssetPrices {
                collateral: dec!(100),
                leveraged: current,
                base_price: base,
            },
            rsi: vec![dec!(50), dec!(50)],
            macd: vec![],
            stochastic: vec![],
            long_ma_bias_pct: None,
            vix: None,
            is_rebalance_checkpoint: false,
        }
    }

    #[test]
    fn test_drop_and_rise_are_one_sided() {
        let down = snapshot_with_base(dec!(100), dec!(68));
        assert_eq!(down.price_drop_pct(), dec!(32));
        assert_eq!(down.price_up_pct(), Decimal::ZERO);

        let up = snapshot_with_base(dec!(100), dec!(112));
        assert_eq!(up.price_up_pct(), dec!(12));
        assert_eq!(up.price_drop_pct(), Decimal::ZERO);
    }

    #[test]
    fn test_zero_base_price_yields_zero_change() {
        let s = snapshot_with_base(Decimal::ZERO, dec!(50));
        assert_eq!(s.price_change_pct(), Decimal::ZERO);
    }

    #[test]
    fn test_valuation_bands() {
        assert_eq!(ValuationBand::from_bias(None), ValuationBand::Unknown);
        assert_eq!(ValuationBand::from_bias(Some(dec!(-3))), ValuationBand::Cheap);
        assert_eq!(ValuationBand::from_bias(Some(dec!(7))), ValuationBand::Mid);
        assert_eq!(ValuationBand::from_bias(Some(dec!(18))), ValuationBand::Expensive);
        assert_eq!(ValuationBand::from_bias(Some(dec!(30))), ValuationBand::Extreme);
    }
}
