use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::config::{AllocationTierKind, StrategyConfig};
use crate::signals::{overheat, EntryScore, OverheatReport, ReversalReport, SellSignalReport};
use crate::types::{MarketSnapshot, ValuationBand};

use super::ledger::PortfolioState;
use super::metrics::PortfolioMetrics;

/// What pushed a deleverage: which ceiling was breached, or the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RebalanceTrigger {
    BorrowCeiling,
    ExposureCeiling,
    Checkpoint,
}

impl std::fmt::Display for RebalanceTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RebalanceTrigger::BorrowCeiling => "borrow ceiling",
            RebalanceTrigger::ExposureCeiling => "exposure ceiling",
            RebalanceTrigger::Checkpoint => "scheduled checkpoint",
        };
        write!(f, "{}", s)
    }
}

/// Exactly one action per evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Action {
    InsufficientData,
    Defend {
        urgent: bool,
    },
    Rebalance {
        trigger: RebalanceTrigger,
        target_borrow_ratio: Decimal,
    },
    TakeProfit {
        target_exposure_ratio: Decimal,
    },
    PanicBuy {
        leverage_fraction: Decimal,
        extreme: bool,
    },
    BlockedOverheat,
    BlockedReversal,
    BlockedCooldown {
        days_left: i64,
    },
    Accumulate {
        tier: AllocationTierKind,
        target_borrow_ratio: Decimal,
    },
    Hold,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::InsufficientData => "insufficient-data",
            Action::Defend { .. } => "defend",
            Action::Rebalance { .. } => "rebalance",
            Action::TakeProfit { .. } => "take-profit",
            Action::PanicBuy { .. } => "panic-buy",
            Action::BlockedOverheat => "blocked-overheat",
            Action::BlockedReversal => "blocked-reversal",
            Action::BlockedCooldown { .. } => "blocked-cooldown",
            Action::Accumulate { .. } => "accumulate",
            Action::Hold => "hold",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CooldownStatus {
    pub last_buy_date: Option<NaiveDate>,
    pub days_since: Option<i64>,
    pub days_left: i64,
    pub active: bool,
}

impl CooldownStatus {
    fn compute(
        last_buy_date: Option<NaiveDate>,
        today: NaiveDate,
        cooldown_days: i64,
    ) -> Self {
        let days_since = last_buy_date.map(|d| (today - d).num_days());
        let days_left = match days_since {
            Some(elapsed) => (cooldown_days - elapsed).max(0),
            None => 0,
        };
        Self {
            last_buy_date,
            days_since,
            days_left,
            active: days_left > 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReserveStatus {
    pub target: Decimal,
    pub current: Decimal,
    pub achievement_pct: Decimal,
    pub sufficient: bool,
}

impl ReserveStatus {
    fn compute(current: Decimal, net_asset: Decimal, config: &StrategyConfig) -> Self {
        let target = net_asset.max(Decimal::ZERO) * config.reserve.target_ratio(net_asset);
        let achievement_pct = if target > Decimal::ZERO {
            (current / target * Decimal::from(100)).round_dp(1)
        } else {
            Decimal::from(100)
        };
        Self {
            target,
            current,
            achievement_pct,
            sufficient: achievement_pct >= config.reserve.sufficiency_pct,
        }
    }
}

/// Everything the state machine looked at, kept on the decision for audit.
#[derive(Debug, Clone, Serialize)]
pub struct SignalAudit {
    pub drop_pct: Decimal,
    pub up_pct: Decimal,
    pub score: EntryScore,
    pub overheat: OverheatReport,
    pub reversal: ReversalReport,
    pub sell: SellSignalReport,
    pub cooldown: CooldownStatus,
    pub reserve: ReserveStatus,
    pub valuation: ValuationBand,
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub action: Action,
    pub rationale: String,
    pub metrics: PortfolioMetrics,
    pub signals: Option<SignalAudit>,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.action.label(), self.rationale)
    }
}

/// Arbitrate one cycle into exactly one action. Pure: reads the snapshot,
/// config, and portfolio state, mutates nothing.
pub fn evaluate(
    snapshot: &MarketSnapshot,
    config: &StrategyConfig,
    state: &PortfolioState,
) -> Decision {
    let th = &config.thresholds;
    let tr = &config.trading;
    let metrics = PortfolioMetrics::compute(state, &snapshot.prices);

    if !snapshot.has_min_history() {
        return Decision {
            action: Action::InsufficientData,
            rationale: "indicator history too short for a reliable read, holding".into(),
            metrics,
            signals: None,
        };
    }

    let drop_pct = snapshot.price_drop_pct();
    let up_pct = snapshot.price_up_pct();
    let lookback = th.signal_lookback;

    let score = EntryScore::compute(snapshot, drop_pct, &config.buy, lookback);
    let heat = OverheatReport::compute(snapshot, th);
    let reversal = ReversalReport::compute(snapshot, th, lookback);
    let sell = SellSignalReport::compute(snapshot, &config.sell, lookback);
    let cooldown = CooldownStatus::compute(state.last_buy_date, snapshot.date, tr.cooldown_days);
    let reserve = ReserveStatus::compute(state.reserve_cash, metrics.net_asset, config);
    let valuation = ValuationBand::from_bias(snapshot.long_ma_bias_pct);

    let audit = SignalAudit {
        drop_pct,
        up_pct,
        score: score.clone(),
        overheat: heat.clone(),
        reversal: reversal.clone(),
        sell: sell.clone(),
        cooldown,
        reserve,
        valuation,
    };

    let decide = |action: Action, rationale: String| Decision {
        action,
        rationale,
        metrics,
        signals: Some(audit.clone()),
    };

    // 1. Survival: maintenance margin under the defend trigger.
    if metrics.has_loan() && metrics.maintenance_margin < th.defend_trigger {
        let urgent = metrics.maintenance_margin < th.mm_danger;
        return decide(
            Action::Defend { urgent },
            format!(
                "maintenance margin {:.1}% below defend trigger {:.0}%, deleveraging to {:.0}%{}",
                metrics.maintenance_margin,
                th.defend_trigger,
                th.defend_target,
                if urgent { " (margin-call imminent)" } else { "" }
            ),
        );
    }

    // 2. Hard ceilings, then the scheduled checkpoint.
    if metrics.borrow_ratio > tr.hard_borrow_limit {
        return decide(
            Action::Rebalance {
                trigger: RebalanceTrigger::BorrowCeiling,
                target_borrow_ratio: tr.hard_limit_repay_ratio,
            },
            format!(
                "borrow ratio {:.2} above hard limit {:.2}, repaying down to {:.2}",
                metrics.borrow_ratio, tr.hard_borrow_limit, tr.hard_limit_repay_ratio
            ),
        );
    }
    if metrics.exposure_ratio > th.exposure_ceiling {
        return decide(
            Action::Rebalance {
                trigger: RebalanceTrigger::ExposureCeiling,
                target_borrow_ratio: th.target_exposure_ratio,
            },
            format!(
                "exposure ratio {:.2} above ceiling {:.2}, pulling back to {:.2}",
                metrics.exposure_ratio, th.exposure_ceiling, th.target_exposure_ratio
            ),
        );
    }
    if snapshot.is_rebalance_checkpoint {
        let (split, _) = config.allocation_for_score(score.total);
        let effective_target = split.leverage.max(th.min_rebalance_ratio);
        if metrics.borrow_ratio > effective_target + th.rebalance_tolerance {
            return decide(
                Action::Rebalance {
                    trigger: RebalanceTrigger::Checkpoint,
                    target_borrow_ratio: effective_target,
                },
                format!(
                    "checkpoint: borrow ratio {:.2} drifted above target {:.2} (+{:.2} tolerance)",
                    metrics.borrow_ratio, effective_target, th.rebalance_tolerance
                ),
            );
        }
    }

    // 3. Take profit.
    if up_pct >= config.sell.min_up_pct && sell.signal_count >= config.sell.min_signal_count {
        let split = config.post_sale_allocation();
        return decide(
            Action::TakeProfit {
                target_exposure_ratio: split.leverage,
            },
            format!(
                "up {:.1}% with {}/{} exit signals, selling back to {} ({:.0}% leverage)",
                up_pct,
                sell.signal_count,
                sell.factor_count,
                split.label,
                split.leverage * Decimal::from(100)
            ),
        );
    }

    // 4. Panic override: capitulation pricing plus a volatility spike.
    if let Some(vix) = snapshot.vix {
        let extreme_drop = drop_pct >= config.extreme_drop_threshold();
        let rsi_crushed = snapshot
            .rsi
            .last()
            .map(|r| *r < config.buy.rsi.oversold / config.buy.panic.rsi_divider)
            .unwrap_or(false);
        if extreme_drop && rsi_crushed && vix >= th.vix_panic {
            let extreme = vix >= th.vix_extreme;
            let leverage_fraction = if extreme {
                (config.buy.panic.suggested_leverage * dec!(1.67)).min(dec!(0.5))
            } else {
                config.buy.panic.suggested_leverage
            };
            return decide(
                Action::PanicBuy {
                    leverage_fraction,
                    extreme,
                },
                format!(
                    "capitulation: drop {:.1}%, RSI crushed, VIX {:.0} — one-off buy toward {:.0}% leverage",
                    drop_pct,
                    vix,
                    leverage_fraction * Decimal::from(100)
                ),
            );
        }
    }

    // 5. Overheat majority vote blocks accumulation outright.
    if heat.is_overheat {
        let progress = overheat::describe(&heat, th);
        return decide(
            Action::BlockedOverheat,
            format!("market overheated, accumulation paused ({})", progress),
        );
    }

    // 6. Reversal triggers pause accumulation (softer than overheat).
    if reversal.should_pause(th) {
        return decide(
            Action::BlockedReversal,
            format!(
                "top-reversal warnings {}/{}, pausing new borrowing",
                reversal.triggered_count, reversal.factor_count
            ),
        );
    }

    // 7. Entry gate.
    if drop_pct < config.buy.min_drop_pct || score.total < config.buy.min_score {
        return decide(
            Action::Hold,
            format!(
                "entry gate not met (drop {:.1}% < {:.0}% or score {} < {}), observing",
                drop_pct, config.buy.min_drop_pct, score.total, config.buy.min_score
            ),
        );
    }

    // 8. Cooldown, unless the signal is strong enough to override it.
    if cooldown.active && score.total < tr.cooldown_override_score {
        return decide(
            Action::BlockedCooldown {
                days_left: cooldown.days_left,
            },
            format!(
                "cooldown: {} of {} days remaining, score {} below override {}",
                cooldown.days_left, tr.cooldown_days, score.total, tr.cooldown_override_score
            ),
        );
    }

    // 9. Accumulate at the tier the score implies, only if it raises leverage.
    let (split, tier) = config.allocation_for_score(score.total);
    if split.leverage > metrics.borrow_ratio {
        return decide(
            Action::Accumulate {
                tier,
                target_borrow_ratio: split.leverage,
            },
            format!(
                "score {} -> {} tier, borrowing toward {:.0}% of net asset",
                score.total,
                tier,
                split.leverage * Decimal::from(100)
            ),
        );
    }

    decide(
        Action::Hold,
        format!(
            "score {} target {:.2} already reached (borrow ratio {:.2}), holding",
            score.total, split.leverage, metrics.borrow_ratio
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetPrices, MacdPoint, StochPoint};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn snapshot_with(rsi: Vec<Decimal>, collateral_price: Decimal, base: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            date: date(),
            prices: AssetPrices {
                collateral: collateral_price,
                leveraged: collateral_price,
                base_price: base,
            },
            rsi,
            macd: vec![
                MacdPoint {
                    macd: dec!(-1),
                    signal: dec!(0),
                    histogram: dec!(-1),
                },
                MacdPoint {
                    macd: dec!(-1),
                    signal: dec!(0),
                    histogram: dec!(-1),
                },
            ],
            stochastic: vec![
                StochPoint {
                    k: dec!(50),
                    d: dec!(50),
                },
                StochPoint {
                    k: dec!(50),
                    d: dec!(50),
                },
            ],
            long_ma_bias_pct: Some(dec!(5)),
            vix: None,
            is_rebalance_checkpoint: false,
        }
    }

    fn healthy_state() -> PortfolioState {
        let mut s = PortfolioState::with_cash(dec!(100000));
        s.collateral_qty = dec!(10000);
        s
    }

    #[test]
    fn test_insufficient_history_holds() {
        let snapshot = snapshot_with(vec![dec!(50)], dec!(100), dec!(100));
        let config = StrategyConfig::default();
        let decision = evaluate(&snapshot, &config, &healthy_state());
        assert_eq!(decision.action, Action::InsufficientData);
        assert!(decision.signals.is_none());
    }

    #[test]
    fn test_defend_outranks_everything() {
        // deep drop and strong score, but margin is 150% < 160 trigger
        let snapshot = snapshot_with(vec![dec!(25), dec!(35)], dec!(100), dec!(150));
        let config = StrategyConfig::default();
        let mut state = healthy_state();
        state.loan = dec!(666667); // collateral 1,000,000 -> margin ~150%

        let decision = evaluate(&snapshot, &config, &state);
        assert!(matches!(decision.action, Action::Defend { urgent: false }));
    }

    #[test]
    fn test_defend_urgent_below_danger_level() {
        let snapshot = snapshot_with(vec![dec!(50), dec!(50)], dec!(100), dec!(100));
        let config = StrategyConfig::default();
        let mut state = healthy_state();
        state.loan = dec!(730000); // margin ~137% < 140 danger level

        let decision = evaluate(&snapshot, &config, &state);
        assert!(matches!(decision.action, Action::Defend { urgent: true }));
    }

    #[test]
    fn test_overheat_blocks_accumulation_even_with_valid_score() {
        // 32% drop earns score 4 but all three heat factors are hot
        let mut snapshot = snapshot_with(vec![dec!(80), dec!(82)], dec!(68), dec!(100));
        snapshot.stochastic = vec![
            StochPoint {
                k: dec!(90),
                d: dec!(88),
            },
            StochPoint {
                k: dec!(92),
                d: dec!(90),
            },
        ];
        snapshot.long_ma_bias_pct = Some(dec!(30));
        let config = StrategyConfig::default();

        let decision = evaluate(&snapshot, &config, &healthy_state());
        assert_eq!(decision.action, Action::BlockedOverheat);
    }

    #[test]
    fn test_entry_gate_holds_on_small_drop() {
        let snapshot = snapshot_with(vec![dec!(50), dec!(50)], dec!(97), dec!(100));
        let config = StrategyConfig::default();
        let decision = evaluate(&snapshot, &config, &healthy_state());
        assert_eq!(decision.action, Action::Hold);
    }

    #[test]
    fn test_cooldown_blocks_moderate_score_but_not_override() {
        // 32% drop alone scores 4; the gate needs 4, cooldown override needs 9
        let mut snapshot = snapshot_with(vec![dec!(45), dec!(45)], dec!(68), dec!(100));
        let mut config = StrategyConfig::default();
        let mut state = healthy_state();
        state.last_buy_date = Some(date() - chrono::Duration::days(5));

        let decision = evaluate(&snapshot, &config, &state);
        assert!(matches!(
            decision.action,
            Action::BlockedCooldown { days_left: 15 }
        ));

        // same day, same state, but an override-strength score proceeds
        config.trading.cooldown_override_score = 4;
        snapshot.is_rebalance_checkpoint = false;
        let decision = evaluate(&snapshot, &config, &state);
        assert!(matches!(decision.action, Action::Accumulate { .. }));
    }

    #[test]
    fn test_accumulate_tier_from_score() {
        // 32% drop => score 4 => lowest tier at 20% leverage
        let snapshot = snapshot_with(vec![dec!(45), dec!(45)], dec!(68), dec!(100));
        let config = StrategyConfig::default();

        let decision = evaluate(&snapshot, &config, &healthy_state());
        match decision.action {
            Action::Accumulate {
                tier,
                target_borrow_ratio,
            } => {
                assert_eq!(tier, AllocationTierKind::Base);
                assert_eq!(target_borrow_ratio, dec!(0.2));
            }
            other => panic!("expected accumulate, got {:?}", other),
        }
    }

    #[test]
    fn test_hold_when_target_already_reached() {
        let snapshot = snapshot_with(vec![dec!(45), dec!(45)], dec!(68), dec!(100));
        let config = StrategyConfig::default();
        let mut state = healthy_state();
        // collateral 680,000 at price 68; loan small enough to keep margin
        // healthy but borrow ratio already past the 0.2 tier target
        state.loan = dec!(200000);
        state.cash = dec!(200000);

        let decision = evaluate(&snapshot, &config, &state);
        assert_eq!(decision.action, Action::Hold);
    }

    #[test]
    fn test_borrow_ceiling_triggers_forced_rebalance() {
        let snapshot = snapshot_with(vec![dec!(50), dec!(50)], dec!(100), dec!(100));
        let config = StrategyConfig::default();
        let mut state = PortfolioState::with_cash(Decimal::ZERO);
        // margin stays above the 160 trigger, but borrow ratio > 1.0
        state.collateral_qty = dec!(10000);
        state.leveraged_qty = dec!(1000);
        state.loan = dec!(620000);
        state.cash = Decimal::ZERO;
        // net = 1,000,000 + 100,000 - 620,000 = 480,000; borrow 1.29; margin 161%

        let decision = evaluate(&snapshot, &config, &state);
        match decision.action {
            Action::Rebalance {
                trigger,
                target_borrow_ratio,
            } => {
                assert_eq!(trigger, RebalanceTrigger::BorrowCeiling);
                assert_eq!(target_borrow_ratio, dec!(0.9));
            }
            other => panic!("expected rebalance, got {:?}", other),
        }
    }

    #[test]
    fn test_checkpoint_rebalance_on_drift() {
        let mut snapshot = snapshot_with(vec![dec!(50), dec!(50)], dec!(100), dec!(100));
        snapshot.is_rebalance_checkpoint = true;
        let config = StrategyConfig::default();
        let mut state = PortfolioState::with_cash(dec!(100000));
        state.collateral_qty = dec!(10000);
        state.leveraged_qty = dec!(3000);
        state.loan = dec!(500000);
        // net = 1,000,000 + 300,000 + 100,000 - 500,000 = 900,000
        // borrow 0.56 > base floor 0.2 + 0.1 tolerance; margin 200% is safe

        let decision = evaluate(&snapshot, &config, &state);
        match decision.action {
            Action::Rebalance { trigger, .. } => {
                assert_eq!(trigger, RebalanceTrigger::Checkpoint)
            }
            other => panic!("expected checkpoint rebalance, got {:?}", other),
        }
    }

    #[test]
    fn test_panic_buy_needs_all_three_conditions() {
        let config = StrategyConfig::default();
        // 35% drop, RSI 15 < 30/1.6, VIX 35 >= 30
        let mut snapshot = snapshot_with(vec![dec!(20), dec!(15)], dec!(65), dec!(100));
        snapshot.vix = Some(dec!(35));

        let decision = evaluate(&snapshot, &config, &healthy_state());
        assert!(matches!(
            decision.action,
            Action::PanicBuy { extreme: false, .. }
        ));

        // calm VIX kills the override; the drop alone still scores an entry
        snapshot.vix = Some(dec!(18));
        let decision = evaluate(&snapshot, &config, &healthy_state());
        assert!(!matches!(decision.action, Action::PanicBuy { .. }));
    }

    #[test]
    fn test_extreme_vix_intensifies_panic_buy() {
        let config = StrategyConfig::default();
        let mut snapshot = snapshot_with(vec![dec!(20), dec!(15)], dec!(65), dec!(100));
        snapshot.vix = Some(dec!(45));

        let decision = evaluate(&snapshot, &config, &healthy_state());
        match decision.action {
            Action::PanicBuy {
                leverage_fraction,
                extreme,
            } => {
                assert!(extreme);
                assert!(leverage_fraction > config.buy.panic.suggested_leverage);
                // 0.3 * 1.67 overshoots the cap, so the cap applies
                assert_eq!(leverage_fraction, dec!(0.5));
            }
            other => panic!("expected panic buy, got {:?}", other),
        }
    }
}
