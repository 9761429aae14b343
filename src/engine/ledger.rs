use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{CooldownReset, ProceedsPolicy, StrategyConfig, TradingSettings};
use crate::types::AssetPrices;

use super::decision::{Action, Decision};
use super::metrics::PortfolioMetrics;

/// Ignore buys below this; share lots under a thousand currency units are
/// churn, not allocation.
fn dust_floor() -> Decimal {
    dec!(1000)
}

fn days_per_year() -> Decimal {
    dec!(365)
}

/// Persistent portfolio state. Owned exclusively by the ledger; callers
/// serialize it for external storage and hand it back next cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub cash: Decimal,
    pub reserve_cash: Decimal,
    pub collateral_qty: Decimal,
    pub leveraged_qty: Decimal,
    pub loan: Decimal,
    pub last_buy_date: Option<NaiveDate>,
    pub margin_call_count: u32,
    #[serde(default)]
    pub accrued_interest: Decimal,
}

impl PortfolioState {
    pub fn with_cash(cash: Decimal) -> Self {
        Self {
            cash,
            reserve_cash: Decimal::ZERO,
            collateral_qty: Decimal::ZERO,
            leveraged_qty: Decimal::ZERO,
            loan: Decimal::ZERO,
            last_buy_date: None,
            margin_call_count: 0,
            accrued_interest: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum CashAmount {
    All,
    Amount(Decimal),
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MarkOutcome {
    pub metrics: PortfolioMetrics,
    pub liquidated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub enum DefendStep {
    ReserveBuyCollateral { spent: Decimal },
    CashBuyCollateral { spent: Decimal },
    ReserveRepay { repaid: Decimal },
    SellLeveragedRepay { sold: Decimal, repaid: Decimal },
}

#[derive(Debug, Clone, Serialize)]
pub struct DefendReport {
    pub starting_margin: Decimal,
    pub ending_margin: Decimal,
    pub target_margin: Decimal,
    pub steps: Vec<DefendStep>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AccumulationFill {
    pub borrowed: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SaleOutcome {
    pub sold_quantity: Decimal,
    pub net_proceeds: Decimal,
    pub repaid: Decimal,
    pub reinvested: Decimal,
}

/// Applies decisions and enforces the broker's own invariants (interest
/// accrual, forced liquidation) against the owned `PortfolioState`.
pub struct PortfolioLedger {
    state: PortfolioState,
}

impl PortfolioLedger {
    pub fn new(state: PortfolioState) -> Self {
        Self { state }
    }

    pub fn with_cash(cash: Decimal) -> Self {
        Self::new(PortfolioState::with_cash(cash))
    }

    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    pub fn into_state(self) -> PortfolioState {
        self.state
    }

    pub fn metrics(&self, prices: &AssetPrices) -> PortfolioMetrics {
        PortfolioMetrics::compute(&self.state, prices)
    }

    pub fn add_cash(&mut self, amount: Decimal) {
        self.state.cash += amount;
    }

    pub fn add_reserve(&mut self, amount: Decimal) {
        self.state.reserve_cash += amount;
    }

    /// Buy the collateral asset with free cash. Clamps to available cash,
    /// floors the share quantity, charges the fee on top. Returns the cash
    /// actually spent (zero for a no-op).
    pub fn buy_collateral(
        &mut self,
        price: Decimal,
        amount: CashAmount,
        tr: &TradingSettings,
    ) -> Decimal {
        let requested = match amount {
            CashAmount::All => self.state.cash,
            CashAmount::Amount(a) => a.min(self.state.cash),
        };
        if requested < dust_floor() {
            return Decimal::ZERO;
        }
        let Some((spent, qty)) = plan_buy(requested, price, tr.fee_rate) else {
            return Decimal::ZERO;
        };
        self.state.collateral_qty += qty;
        self.state.cash -= spent;
        debug!("Bought collateral: {} shares for {}", qty, spent);
        spent
    }

    /// Accrue one day of loan interest against cash, unconditionally.
    pub fn apply_daily_interest(&mut self, tr: &TradingSettings) -> Decimal {
        let interest = self.state.loan * tr.annual_interest_rate / days_per_year();
        self.state.cash -= interest;
        self.state.accrued_interest += interest;
        interest
    }

    /// Recompute derived values and enforce the broker's hard floor: below
    /// the margin-call threshold the whole leveraged position is sold and
    /// the proceeds repay the loan. This runs regardless of whatever the
    /// decision engine concluded this cycle.
    pub fn mark_to_market(
        &mut self,
        date: NaiveDate,
        prices: &AssetPrices,
        tr: &TradingSettings,
    ) -> MarkOutcome {
        let metrics = self.metrics(prices);

        let must_liquidate = self.state.loan > Decimal::ZERO
            && metrics.maintenance_margin < tr.margin_call_threshold;
        if !must_liquidate {
            return MarkOutcome {
                metrics,
                liquidated: false,
            };
        }

        warn!(
            "[{}] Margin call: maintenance {:.0}% below {:.0}%, liquidating leveraged position",
            date, metrics.maintenance_margin, tr.margin_call_threshold
        );

        let proceeds = self.state.leveraged_qty * prices.leveraged;
        let tax = (proceeds * tr.tax_rate).floor();
        let fee = (proceeds * tr.fee_rate).floor();
        self.state.leveraged_qty = Decimal::ZERO;
        self.state.cash += proceeds - tax - fee;

        let repaid = self.repay_loan_from_cash();
        self.state.margin_call_count += 1;
        debug!("Forced liquidation repaid {} of loan", repaid);

        MarkOutcome {
            metrics: self.metrics(prices),
            liquidated: true,
        }
    }

    /// Emergency deleverage back to the defend target. Remediation order:
    /// reserve cash buys collateral, free cash buys collateral, reserve
    /// repays the loan, and only then leveraged holdings are sold. Margin
    /// is recomputed after every step and the chain stops at the target.
    pub fn defend(&mut self, prices: &AssetPrices, config: &StrategyConfig) -> DefendReport {
        let target = config.thresholds.defend_target;
        let tr = &config.trading;
        let starting_margin = self.metrics(prices).maintenance_margin;
        let mut steps = Vec::new();

        let target_frac = target / Decimal::from(100);

        // 1) reserve cash -> collateral
        if self.margin_below(prices, target) && self.state.reserve_cash >= dust_floor() {
            let shortfall = self.collateral_shortfall(prices, target_frac);
            let budget = self.state.reserve_cash.min(shortfall * (Decimal::ONE + tr.fee_rate));
            if let Some((spent, qty)) = plan_buy(budget, prices.collateral, tr.fee_rate) {
                self.state.collateral_qty += qty;
                self.state.reserve_cash -= spent;
                steps.push(DefendStep::ReserveBuyCollateral { spent });
            }
        }

        // 2) free cash -> collateral
        if self.margin_below(prices, target) && self.state.cash >= dust_floor() {
            let shortfall = self.collateral_shortfall(prices, target_frac);
            let budget = self.state.cash.min(shortfall * (Decimal::ONE + tr.fee_rate));
            if let Some((spent, qty)) = plan_buy(budget, prices.collateral, tr.fee_rate) {
                self.state.collateral_qty += qty;
                self.state.cash -= spent;
                steps.push(DefendStep::CashBuyCollateral { spent });
            }
        }

        // 3) remaining reserve repays the loan directly
        if self.margin_below(prices, target) && self.state.reserve_cash > Decimal::ZERO {
            let excess = self.excess_loan(prices, target_frac);
            let repaid = excess.min(self.state.reserve_cash).min(self.state.loan);
            if repaid > Decimal::ZERO {
                self.state.reserve_cash -= repaid;
                self.state.loan -= repaid;
                steps.push(DefendStep::ReserveRepay { repaid });
            }
        }

        // 4) last resort: sell leveraged holdings to repay
        if self.margin_below(prices, target) && self.state.leveraged_qty > Decimal::ZERO {
            let excess = self.excess_loan(prices, target_frac);
            if excess > Decimal::ZERO {
                let (sold_qty, net) = self.sell_leveraged(excess, prices.leveraged, tr);
                if sold_qty > Decimal::ZERO {
                    let repaid = self.repay_loan_from_cash();
                    steps.push(DefendStep::SellLeveragedRepay {
                        sold: sold_qty * prices.leveraged,
                        repaid,
                    });
                }
            }
        }

        let ending_margin = self.metrics(prices).maintenance_margin;
        info!(
            "Margin defense: {:.0}% -> {:.0}% (target {:.0}%, {} steps)",
            starting_margin,
            ending_margin,
            target,
            steps.len()
        );

        DefendReport {
            starting_margin,
            ending_margin,
            target_margin: target,
            steps,
        }
    }

    /// Deleverage toward a target borrow ratio: sell leveraged holdings for
    /// `loan - net * target`, repay, and route any remainder per the
    /// proceeds policy. No-op below the minimum actionable size.
    pub fn rebalance(
        &mut self,
        target_borrow_ratio: Decimal,
        prices: &AssetPrices,
        config: &StrategyConfig,
    ) -> Option<SaleOutcome> {
        let metrics = self.metrics(prices);
        let sell_amount = self.state.loan - metrics.net_asset * target_borrow_ratio;
        self.sell_and_repay(sell_amount, prices, config)
    }

    /// Take-profit sale back to a target exposure ratio.
    pub fn take_profit(
        &mut self,
        target_exposure_ratio: Decimal,
        prices: &AssetPrices,
        config: &StrategyConfig,
    ) -> Option<SaleOutcome> {
        let metrics = self.metrics(prices);
        let sell_amount = metrics.leveraged_value - metrics.net_asset * target_exposure_ratio;
        self.sell_and_repay(sell_amount, prices, config)
    }

    fn sell_and_repay(
        &mut self,
        sell_amount: Decimal,
        prices: &AssetPrices,
        config: &StrategyConfig,
    ) -> Option<SaleOutcome> {
        let tr = &config.trading;
        if sell_amount <= tr.min_action_amount {
            return None;
        }

        let (sold_qty, net_proceeds) = self.sell_leveraged(sell_amount, prices.leveraged, tr);
        if sold_qty.is_zero() {
            return None;
        }

        let repaid = self.repay_loan_from_cash();

        // Leftover cash can be rotated into collateral, which lowers
        // exposure and raises the margin denominator at the same time.
        let reinvested = match config.sell.proceeds {
            ProceedsPolicy::ReinvestCollateral => {
                self.buy_collateral(prices.collateral, CashAmount::All, tr)
            }
            ProceedsPolicy::HoldCash => Decimal::ZERO,
        };

        info!(
            "Deleverage: sold {} shares, repaid {}, reinvested {}",
            sold_qty, repaid, reinvested
        );

        Some(SaleOutcome {
            sold_quantity: sold_qty,
            net_proceeds,
            repaid,
            reinvested,
        })
    }

    /// Borrow-and-buy toward a target borrow ratio, within the collateral
    /// credit line. The fee rides inside the borrowed total, so the loan
    /// can never exceed `collateral_value * max_loan_to_collateral`.
    pub fn accumulate(
        &mut self,
        target_borrow_ratio: Decimal,
        date: NaiveDate,
        prices: &AssetPrices,
        config: &StrategyConfig,
    ) -> Option<AccumulationFill> {
        let tr = &config.trading;
        let metrics = self.metrics(prices);

        let target_exposure = metrics.net_asset * target_borrow_ratio;
        let desired = target_exposure - metrics.leveraged_value;
        if desired <= tr.min_action_amount {
            return None;
        }

        let max_loan = metrics.collateral_value * tr.max_loan_to_collateral;
        let available_credit = max_loan - self.state.loan;
        let principal = desired.min(available_credit);
        if principal <= tr.min_action_amount {
            return None;
        }

        let fee = (principal * tr.fee_rate).floor();
        let total = principal + fee;
        if available_credit < total {
            debug!(
                "[{}] Accumulation skipped: credit {} cannot cover {} incl. fee",
                date, available_credit, total
            );
            return None;
        }

        let quantity = (principal / prices.leveraged).floor();
        if quantity.is_zero() {
            return None;
        }

        self.state.loan += total;
        self.state.leveraged_qty += quantity;
        self.state.last_buy_date = Some(date);

        info!(
            "[{}] Borrowed {} (fee {}) and bought {} leveraged shares",
            date, total, fee, quantity
        );

        Some(AccumulationFill {
            borrowed: total,
            quantity,
        })
    }

    /// One-off aggressive buy toward `net * fraction`, used by the panic
    /// override. Bounded by the same credit line; exempt from cooldown, but
    /// stamps the buy date when the reset policy counts any borrow.
    pub fn panic_buy(
        &mut self,
        leverage_fraction: Decimal,
        date: NaiveDate,
        prices: &AssetPrices,
        config: &StrategyConfig,
    ) -> Option<AccumulationFill> {
        let before = self.state.last_buy_date;
        let fill = self.accumulate(leverage_fraction, date, prices, config)?;
        if config.trading.cooldown_reset == CooldownReset::ExposureIncrease {
            // tiered accumulation alone drives the cooldown clock
            self.state.last_buy_date = before;
        }
        Some(fill)
    }

    fn margin_below(&self, prices: &AssetPrices, level: Decimal) -> bool {
        let m = self.metrics(prices);
        m.has_loan() && m.maintenance_margin < level
    }

    /// Collateral value still missing for `collateral / loan >= target`.
    fn collateral_shortfall(&self, prices: &AssetPrices, target_frac: Decimal) -> Decimal {
        let collateral_value = self.state.collateral_qty * prices.collateral;
        (self.state.loan * target_frac - collateral_value).max(Decimal::ZERO)
    }

    /// Loan above the level the current collateral can carry at `target`.
    fn excess_loan(&self, prices: &AssetPrices, target_frac: Decimal) -> Decimal {
        let collateral_value = self.state.collateral_qty * prices.collateral;
        (self.state.loan - collateral_value / target_frac).max(Decimal::ZERO)
    }

    /// Sell up to `amount` worth of the leveraged asset, net of tax and fee.
    /// Returns (quantity sold, net proceeds credited to cash).
    fn sell_leveraged(
        &mut self,
        amount: Decimal,
        price: Decimal,
        tr: &TradingSettings,
    ) -> (Decimal, Decimal) {
        let qty = (amount / price).floor().min(self.state.leveraged_qty);
        if qty <= Decimal::ZERO {
            return (Decimal::ZERO, Decimal::ZERO);
        }
        let proceeds = qty * price;
        let tax = (proceeds * tr.tax_rate).floor();
        let fee = (proceeds * tr.fee_rate).floor();
        let net = proceeds - tax - fee;
        self.state.leveraged_qty -= qty;
        self.state.cash += net;
        (qty, net)
    }

    /// Repayment is clamped to both the loan and available cash, so the
    /// loan never goes negative.
    fn repay_loan_from_cash(&mut self) -> Decimal {
        let repay = self.state.loan.min(self.state.cash).max(Decimal::ZERO);
        self.state.loan -= repay;
        self.state.cash -= repay;
        repay
    }

    /// Execute whatever the decision engine concluded. Blocking and hold
    /// actions mutate nothing.
    pub fn apply(
        &mut self,
        decision: &Decision,
        date: NaiveDate,
        prices: &AssetPrices,
        config: &StrategyConfig,
    ) {
        match &decision.action {
            Action::Defend { .. } => {
                let report = self.defend(prices, config);
                debug!(
                    "Defense ran {} steps, margin {} -> {}",
                    report.steps.len(),
                    report.starting_margin.round_dp(2),
                    report.ending_margin.round_dp(2)
                );
            }
            Action::Rebalance {
                target_borrow_ratio, ..
            } => match self.rebalance(*target_borrow_ratio, prices, config) {
                Some(sale) => debug!(
                    "Rebalance sold {} shares, repaid {}",
                    sale.sold_quantity, sale.repaid
                ),
                None => debug!("Rebalance found nothing to sell"),
            },
            Action::TakeProfit {
                target_exposure_ratio,
            } => match self.take_profit(*target_exposure_ratio, prices, config) {
                Some(sale) => debug!(
                    "Take-profit sold {} shares, net proceeds {}",
                    sale.sold_quantity, sale.net_proceeds
                ),
                None => debug!("Take-profit found nothing to sell"),
            },
            Action::PanicBuy {
                leverage_fraction, ..
            } => match self.panic_buy(*leverage_fraction, date, prices, config) {
                Some(fill) => debug!(
                    "Panic buy borrowed {} for {} shares",
                    fill.borrowed, fill.quantity
                ),
                None => debug!("Panic buy skipped, no usable credit"),
            },
            Action::Accumulate {
                target_borrow_ratio, ..
            } => match self.accumulate(*target_borrow_ratio, date, prices, config) {
                Some(fill) => debug!(
                    "Accumulation borrowed {} for {} shares",
                    fill.borrowed, fill.quantity
                ),
                None => debug!("Accumulation skipped, no usable credit"),
            },
            Action::InsufficientData
            | Action::BlockedOverheat
            | Action::BlockedReversal
            | Action::BlockedCooldown { .. }
            | Action::Hold => {}
        }
    }
}

/// Spend up to `budget` on shares at `price`, fee charged on top, quantity
/// floored to whole shares. None when the budget buys nothing.
fn plan_buy(budget: Decimal, price: Decimal, fee_rate: Decimal) -> Option<(Decimal, Decimal)> {
    if budget <= Decimal::ZERO || price <= Decimal::ZERO {
        return None;
    }
    let max_cost = budget / (Decimal::ONE + fee_rate);
    let qty = (max_cost / price).floor();
    if qty <= Decimal::ZERO {
        return None;
    }
    let cost = qty * price;
    let fee = (cost * fee_rate).floor();
    Some((cost + fee, qty))
}
