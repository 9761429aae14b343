use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

/// Summary of a completed backtest run, with a buy-and-hold benchmark for
/// the same cash flows.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub trading_days: usize,
    pub initial_cash: Decimal,
    pub total_contributions: Decimal,
    pub final_net_asset: Decimal,
    pub total_return_pct: Decimal,
    pub cagr_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub margin_call_count: u32,
    pub accrued_interest: Decimal,
    pub final_borrow_ratio: Decimal,
    pub final_maintenance_margin: Decimal,
    pub action_counts: BTreeMap<String, usize>,
    pub benchmark_final: Decimal,
    pub benchmark_return_pct: Decimal,
}

impl BacktestReport {
    /// Annualized growth of contributed capital. This goes straight into a
    /// report line; two decimals of precision is plenty, so the float
    /// round-trip for the fractional power is acceptable.
    pub fn cagr(invested: Decimal, final_value: Decimal, days: i64) -> Decimal {
        if invested <= Decimal::ZERO || final_value <= Decimal::ZERO || days <= 0 {
            return Decimal::ZERO;
        }
        let ratio = (final_value / invested).to_f64().unwrap_or(0.0);
        let years = days as f64 / 365.25;
        if ratio <= 0.0 || years <= 0.0 {
            return Decimal::ZERO;
        }
        let cagr = (ratio.powf(1.0 / years) - 1.0) * 100.0;
        Decimal::from_f64_retain(cagr)
            .unwrap_or(Decimal::ZERO)
            .round_dp(2)
    }
}

impl fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Backtest Report ===")?;
        writeln!(
            f,
            "Period:            {} -> {} ({} trading days)",
            self.start_date, self.end_date, self.trading_days
        )?;
        writeln!(f, "Initial cash:      {}", self.initial_cash)?;
        writeln!(f, "Contributions:     {}", self.total_contributions)?;
        writeln!(f, "Final net asset:   {}", self.final_net_asset.round_dp(0))?;
        writeln!(f, "Total return:      {}%", self.total_return_pct)?;
        writeln!(f, "CAGR:              {}%", self.cagr_pct)?;
        writeln!(f, "Max drawdown:      {}%", self.max_drawdown_pct)?;
        writeln!(f, "Margin calls:      {}", self.margin_call_count)?;
        writeln!(f, "Interest paid:     {}", self.accrued_interest.round_dp(0))?;
        writeln!(f, "Final borrow:      {}", self.final_borrow_ratio)?;
        writeln!(f, "Final margin:      {}%", self.final_maintenance_margin)?;
        writeln!(
            f,
            "Benchmark (hold):  {} ({}%)",
            self.benchmark_final.round_dp(0),
            self.benchmark_return_pct
        )?;
        writeln!(f, "--- Actions ---")?;
        for (label, count) in &self.action_counts {
            writeln!(f, "{:<20} {}", label, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cagr_doubles_in_two_years() {
        let cagr = BacktestReport::cagr(dec!(100000), dec!(200000), 731);
        // 2x over two years is ~41.4% annualized
        assert!(cagr > dec!(41) && cagr < dec!(42), "cagr was {}", cagr);
    }

    #[test]
    fn test_cagr_zero_on_degenerate_inputs() {
        assert_eq!(BacktestReport::cagr(dec!(0), dec!(100), 365), Decimal::ZERO);
        assert_eq!(BacktestReport::cagr(dec!(100), dec!(0), 365), Decimal::ZERO);
        assert_eq!(BacktestReport::cagr(dec!(100), dec!(200), 0), Decimal::ZERO);
    }
}
