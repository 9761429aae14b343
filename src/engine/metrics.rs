use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::types::AssetPrices;

use super::ledger::PortfolioState;

/// Sentinel maintenance margin reported while no loan is outstanding.
pub fn unlimited_margin() -> Decimal {
    dec!(999)
}

/// Derived portfolio values. Never stored; recomputed from state and prices
/// every time they are needed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PortfolioMetrics {
    pub collateral_value: Decimal,
    pub leveraged_value: Decimal,
    pub loan: Decimal,
    pub gross_asset: Decimal,
    pub net_asset: Decimal,
    /// collateral value / loan, in percent; sentinel when loan is zero.
    pub maintenance_margin: Decimal,
    /// leveraged value / net asset; zero when net asset is not positive.
    pub exposure_ratio: Decimal,
    /// loan / net asset; zero when net asset is not positive.
    pub borrow_ratio: Decimal,
    /// gross asset / net asset.
    pub actual_leverage: Decimal,
}

impl PortfolioMetrics {
    pub fn compute(state: &PortfolioState, prices: &AssetPrices) -> Self {
        let collateral_value = state.collateral_qty * prices.collateral;
        let leveraged_value = state.leveraged_qty * prices.leveraged;
        // Reserve cash is earmarked for margin defense and deliberately
        // excluded from the working asset base.
        let gross_asset = collateral_value + leveraged_value + state.cash;
        let net_asset = gross_asset - state.loan;

        let maintenance_margin = if state.loan > Decimal::ZERO {
            collateral_value / state.loan * Decimal::from(100)
        } else {
            unlimited_margin()
        };

        let (exposure_ratio, borrow_ratio, actual_leverage) = if net_asset > Decimal::ZERO {
            (
                leveraged_value / net_asset,
                state.loan / net_asset,
                gross_asset / net_asset,
            )
        } else {
            (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
        };

        Self {
            collateral_value,
            leveraged_value,
            loan: state.loan,
            gross_asset,
            net_asset,
            maintenance_margin,
            exposure_ratio,
            borrow_ratio,
            actual_leverage,
        }
    }

    pub fn has_loan(&self) -> bool {
        self.loan > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn prices() -> AssetPrices {
        AssetPrices {
            collateral: dec!(100),
            leveraged: dec!(40),
            base_price: dec!(40),
        }
    }

    fn state(loan: Decimal) -> PortfolioState {
        PortfolioState {
            cash: dec!(50000),
            reserve_cash: Decimal::ZERO,
            collateral_qty: dec!(10000),
            leveraged_qty: dec!(5000),
            loan,
            last_buy_date: None,
            margin_call_count: 0,
            accrued_interest: Decimal::ZERO,
        }
    }

    #[test]
    fn test_unleveraged_margin_is_sentinel() {
        let m = PortfolioMetrics::compute(&state(Decimal::ZERO), &prices());
        assert_eq!(m.maintenance_margin, unlimited_margin());
        assert!(!m.has_loan());
    }

    #[test]
    fn test_margin_ratio_arithmetic() {
        // collateral 1,000,000 / loan 600,000 -> 166.67%
        let m = PortfolioMetrics::compute(&state(dec!(600000)), &prices());
        assert_eq!(m.collateral_value, dec!(1000000));
        let margin = m.maintenance_margin.round_dp(2);
        assert_eq!(margin, dec!(166.67));
    }

    #[test]
    fn test_loan_detected_even_when_margin_equals_sentinel() {
        // collateral 999,000 / loan 100,000 computes to exactly 999%
        let mut s = state(dec!(100000));
        s.collateral_qty = dec!(9990);
        let m = PortfolioMetrics::compute(&s, &prices());
        assert_eq!(m.maintenance_margin, unlimited_margin());
        assert!(m.has_loan());
    }

    #[test]
    fn test_ratios_zero_when_net_asset_not_positive() {
        let mut s = state(dec!(2000000));
        s.cash = Decimal::ZERO;
        let m = PortfolioMetrics::compute(&s, &prices());
        assert!(m.net_asset <= Decimal::ZERO);
        assert_eq!(m.exposure_ratio, Decimal::ZERO);
        assert_eq!(m.borrow_ratio, Decimal::ZERO);
    }
}
