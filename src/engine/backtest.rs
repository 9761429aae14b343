use std::collections::BTreeMap;

use anyhow::{bail, Result};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::StrategyConfig;
use crate::types::{AssetPrices, MacdPoint, MarketSnapshot, StochPoint};

use super::decision::evaluate;
use super::ledger::{CashAmount, PortfolioLedger, PortfolioState};
use super::results::BacktestReport;

/// One day of collateral-asset history with precomputed indicators, as
/// loaded from a JSON export. Indicator fields may be missing for the
/// warm-up period at the start of the series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryBar {
    pub date: NaiveDate,
    pub close: Decimal,
    #[serde(default)]
    pub rsi: Option<Decimal>,
    #[serde(default)]
    pub macd: Option<MacdPoint>,
    #[serde(default)]
    pub stochastic: Option<StochPoint>,
    #[serde(default)]
    pub long_ma_bias_pct: Option<Decimal>,
    #[serde(default)]
    pub vix: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSettings {
    pub initial_cash: Decimal,
    pub monthly_contribution: Decimal,
    /// Daily-return multiple of the synthetic leveraged series.
    pub leverage_factor: Decimal,
    /// Annual expense drag of the synthetic leveraged fund.
    pub leveraged_annual_expense: Decimal,
    /// How many trailing bars feed the per-day indicator windows.
    pub indicator_window: usize,
    /// Trailing bars scanned for the semiannual base-price refresh.
    pub base_price_window: usize,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            initial_cash: dec!(1000000),
            monthly_contribution: dec!(30000),
            leverage_factor: dec!(2),
            leveraged_annual_expense: dec!(0.01),
            indicator_window: 30,
            base_price_window: 120,
        }
    }
}

fn trading_days_per_year() -> Decimal {
    dec!(252)
}

/// Replays the daily decision cycle over collateral history. The leveraged
/// asset is synthesized from the collateral's daily returns, so the two
/// series stay correlated the way a same-index leveraged fund is.
pub struct BacktestEngine {
    config: StrategyConfig,
    settings: BacktestSettings,
}

impl BacktestEngine {
    pub fn new(config: StrategyConfig, settings: BacktestSettings) -> Self {
        Self { config, settings }
    }

    pub fn run(&self, bars: &[HistoryBar]) -> Result<BacktestReport> {
        if bars.len() < 2 {
            bail!("backtest needs at least two bars, got {}", bars.len());
        }

        let cfg = &self.config;
        let set = &self.settings;
        let daily_drag = set.leveraged_annual_expense / trading_days_per_year();

        let mut ledger = PortfolioLedger::new(PortfolioState::with_cash(set.initial_cash));
        let mut leveraged_price = bars[0].close;
        let mut leveraged_history = vec![leveraged_price];
        let mut base_price = bars[0].close;
        let mut total_contributions = Decimal::ZERO;
        let mut action_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut peak = Decimal::ZERO;
        let mut max_drawdown = Decimal::ZERO;

        // Benchmark: same cash flows, all into the collateral asset, held.
        let mut bench_qty = set.initial_cash / bars[0].close;

        // Seed the portfolio: carve out the reserve, put the rest to work.
        self.fund_reserve(&mut ledger, set.initial_cash);
        ledger.buy_collateral(bars[0].close, CashAmount::All, &cfg.trading);

        for i in 1..bars.len() {
            let bar = &bars[i];
            let prev = &bars[i - 1];

            let daily_return = (bar.close - prev.close) / prev.close;
            leveraged_price *= Decimal::ONE + set.leverage_factor * daily_return - daily_drag;
            if leveraged_price < dec!(0.01) {
                leveraged_price = dec!(0.01);
            }
            leveraged_history.push(leveraged_price);

            let month_rolled = bar.date.month() != prev.date.month();
            if month_rolled {
                ledger.add_cash(set.monthly_contribution);
                total_contributions += set.monthly_contribution;
                self.fund_reserve(&mut ledger, set.monthly_contribution);
                ledger.buy_collateral(bar.close, CashAmount::All, &cfg.trading);
            }

            // Semiannual anchor refresh: the drop/rise reference becomes the
            // best leveraged price of the trailing window. After a deep bear
            // half-year the anchor comes down with the market.
            let is_checkpoint =
                month_rolled && (bar.date.month() == 1 || bar.date.month() == 7);
            if is_checkpoint {
                let from = leveraged_history.len().saturating_sub(set.base_price_window);
                if let Some(max) = leveraged_history[from..].iter().copied().reduce(Decimal::max)
                {
                    base_price = max;
                }
                debug!("[{}] base price refreshed to {}", bar.date, base_price);
            }

            let prices = AssetPrices {
                collateral: bar.close,
                leveraged: leveraged_price,
                base_price,
            };
            let snapshot = self.build_snapshot(bars, i, &prices, is_checkpoint);

            let decision = evaluate(&snapshot, cfg, ledger.state());
            *action_counts
                .entry(decision.action.label().to_string())
                .or_insert(0) += 1;
            ledger.apply(&decision, bar.date, &prices, cfg);

            ledger.apply_daily_interest(&cfg.trading);
            // the broker's floor runs after everything else each day
            ledger.mark_to_market(bar.date, &prices, &cfg.trading);

            if month_rolled {
                bench_qty += set.monthly_contribution / bar.close;
            }

            let net = ledger.metrics(&prices).net_asset + ledger.state().reserve_cash;
            if net > peak {
                peak = net;
            }
            if peak > Decimal::ZERO {
                let dd = (peak - net) / peak * Decimal::from(100);
                if dd > max_drawdown {
                    max_drawdown = dd;
                }
            }
        }

        let last = &bars[bars.len() - 1];
        let final_prices = AssetPrices {
            collateral: last.close,
            leveraged: leveraged_price,
            base_price,
        };
        let metrics = ledger.metrics(&final_prices);
        let final_net = metrics.net_asset + ledger.state().reserve_cash;
        let invested = set.initial_cash + total_contributions;
        let days = (last.date - bars[0].date).num_days();
        let benchmark_final = bench_qty * last.close;

        let report = BacktestReport {
            start_date: bars[0].date,
            end_date: last.date,
            trading_days: bars.len(),
            initial_cash: set.initial_cash,
            total_contributions,
            final_net_asset: final_net,
            total_return_pct: pct_return(invested, final_net),
            cagr_pct: BacktestReport::cagr(invested, final_net, days),
            max_drawdown_pct: max_drawdown.round_dp(2),
            margin_call_count: ledger.state().margin_call_count,
            accrued_interest: ledger.state().accrued_interest,
            final_borrow_ratio: metrics.borrow_ratio,
            final_maintenance_margin: metrics.maintenance_margin,
            action_counts,
            benchmark_final,
            benchmark_return_pct: pct_return(invested, benchmark_final),
        };

        info!(
            "Backtest complete: {} days, return {}%, {} margin calls",
            report.trading_days, report.total_return_pct, report.margin_call_count
        );

        Ok(report)
    }

    /// Divert fresh cash into the defense reserve until it reaches target.
    fn fund_reserve(&self, ledger: &mut PortfolioLedger, inflow: Decimal) {
        let state = ledger.state();
        let net = state.cash + state.reserve_cash;
        let target = net * self.config.reserve.target_ratio(net);
        let deficit = (target - state.reserve_cash).max(Decimal::ZERO);
        let diverted = deficit.min(inflow).min(state.cash);
        if diverted > Decimal::ZERO {
            ledger.add_cash(-diverted);
            ledger.add_reserve(diverted);
        }
    }

    fn build_snapshot(
        &self,
        bars: &[HistoryBar],
        i: usize,
        prices: &AssetPrices,
        is_checkpoint: bool,
    ) -> MarketSnapshot {
        let from = i.saturating_sub(self.settings.indicator_window - 1);
        let window = &bars[from..=i];
        MarketSnapshot {
            date: bars[i].date,
            prices: *prices,
            rsi: window.iter().filter_map(|b| b.rsi).collect(),
            macd: window.iter().filter_map(|b| b.macd).collect(),
            stochastic: window.iter().filter_map(|b| b.stochastic).collect(),
            long_ma_bias_pct: bars[i].long_ma_bias_pct,
            vix: bars[i].vix,
            is_rebalance_checkpoint: is_checkpoint,
        }
    }
}

fn pct_return(invested: Decimal, final_value: Decimal) -> Decimal {
    if invested <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    ((final_value - invested) / invested * Decimal::from(100)).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(date: NaiveDate, close: Decimal) -> HistoryBar {
        HistoryBar {
            date,
            close,
            rsi: Some(dec!(50)),
            macd: Some(MacdPoint {
                macd: dec!(0),
                signal: dec!(0),
                histogram: dec!(0),
            }),
            stochastic: Some(StochPoint {
                k: dec!(50),
                d: dec!(50),
            }),
            long_ma_bias_pct: Some(dec!(0)),
            vix: None,
        }
    }

    fn flat_series(days: usize) -> Vec<HistoryBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        (0..days)
            .map(|i| bar(start + chrono::Duration::days(i as i64), dec!(100)))
            .collect()
    }

    #[test]
    fn test_rejects_short_history() {
        let engine = BacktestEngine::new(StrategyConfig::default(), BacktestSettings::default());
        let bars = flat_series(1);
        assert!(engine.run(&bars).is_err());
    }

    #[test]
    fn test_flat_market_never_margin_calls() {
        let engine = BacktestEngine::new(StrategyConfig::default(), BacktestSettings::default());
        let bars = flat_series(90);
        let report = engine.run(&bars).unwrap();
        assert_eq!(report.margin_call_count, 0);
        // no price move, no drop signal, nothing should have borrowed
        assert_eq!(report.final_borrow_ratio, Decimal::ZERO);
    }

    #[test]
    fn test_contributions_arrive_on_month_roll() {
        let engine = BacktestEngine::new(StrategyConfig::default(), BacktestSettings::default());
        // Jan 2 .. Apr 1 spans three month boundaries
        let bars = flat_series(91);
        let report = engine.run(&bars).unwrap();
        assert_eq!(report.total_contributions, dec!(90000));
    }

    #[test]
    fn test_crash_triggers_accumulation() {
        let engine = BacktestEngine::new(StrategyConfig::default(), BacktestSettings::default());
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        // 60 flat days to seed, then a slide to 35% below the base price
        let mut bars: Vec<HistoryBar> = (0..60)
            .map(|i| bar(start + chrono::Duration::days(i as i64), dec!(100)))
            .collect();
        for i in 0..30 {
            let price = dec!(100) - Decimal::from(i + 1) * dec!(1.2);
            bars.push(bar(
                start + chrono::Duration::days(60 + i as i64),
                price.round_dp(2),
            ));
        }
        let report = engine.run(&bars).unwrap();
        let accumulated = report.action_counts.get("accumulate").copied().unwrap_or(0);
        let panicked = report.action_counts.get("panic-buy").copied().unwrap_or(0);
        assert!(
            accumulated + panicked > 0,
            "a 35% drawdown should have opened leverage: {:?}",
            report.action_counts
        );
        assert!(report.final_borrow_ratio > Decimal::ZERO);
    }
}
