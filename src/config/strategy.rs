use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Full strategy configuration, loaded once per run from JSON and validated
/// before any evaluation. Immutable for the duration of a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub thresholds: ThresholdSettings,
    pub buy: BuySettings,
    pub sell: SellSettings,
    pub allocation: AllocationSettings,
    pub trading: TradingSettings,
    pub reserve: ReserveSettings,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdSettings::default(),
            buy: BuySettings::default(),
            sell: SellSettings::default(),
            allocation: AllocationSettings::default(),
            trading: TradingSettings::default(),
            reserve: ReserveSettings::default(),
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let th = &self.thresholds;
        if th.defend_target <= th.defend_trigger {
            errors.push("thresholds: defend_target must be > defend_trigger".to_string());
        }
        if th.mm_danger >= th.defend_trigger {
            errors.push("thresholds: mm_danger must be < defend_trigger".to_string());
        }
        for (name, v) in [
            ("rsi_overheat_level", th.rsi_overheat_level),
            ("stoch_d_overheat_level", th.stoch_d_overheat_level),
            ("rsi_reversal_level", th.rsi_reversal_level),
            ("stoch_reversal_level", th.stoch_reversal_level),
        ] {
            if v < Decimal::ZERO || v > Decimal::from(100) {
                errors.push(format!("thresholds: {} must be in 0..=100", name));
            }
        }
        if th.rsi_overheat_level < th.rsi_reversal_level {
            errors.push("thresholds: rsi_overheat_level must be >= rsi_reversal_level".to_string());
        }
        if th.stoch_d_overheat_level < th.stoch_reversal_level {
            errors.push(
                "thresholds: stoch_d_overheat_level must be >= stoch_reversal_level".to_string(),
            );
        }
        if th.overheat_count == 0 || th.overheat_count > 3 {
            errors.push("thresholds: overheat_count must be in 1..=3".to_string());
        }
        if th.reversal_trigger_count == 0 || th.reversal_trigger_count > 4 {
            errors.push("thresholds: reversal_trigger_count must be in 1..=4".to_string());
        }
        if th.exposure_ceiling <= Decimal::ZERO || th.exposure_ceiling > Decimal::ONE {
            errors.push("thresholds: exposure_ceiling must be in (0, 1]".to_string());
        }
        if th.target_exposure_ratio >= th.exposure_ceiling {
            errors.push("thresholds: target_exposure_ratio must be < exposure_ceiling".to_string());
        }
        if th.signal_lookback < 2 {
            errors.push("thresholds: signal_lookback must be >= 2".to_string());
        }
        if th.score_aggressive <= th.score_active {
            errors.push("thresholds: score_aggressive must be > score_active".to_string());
        }
        if th.vix_extreme < th.vix_panic {
            errors.push("thresholds: vix_extreme must be >= vix_panic".to_string());
        }

        if self.buy.drop_rules.is_empty() {
            errors.push("buy: drop_rules must not be empty".to_string());
        }
        for pair in self.buy.drop_rules.windows(2) {
            if pair[0].min_drop <= pair[1].min_drop {
                errors.push(format!(
                    "buy: drop_rules must be sorted descending by min_drop ({} <= {})",
                    pair[0].min_drop, pair[1].min_drop
                ));
                break;
            }
        }
        if self.buy.panic.min_drop_rank == 0 {
            errors.push("buy: panic.min_drop_rank must be >= 1".to_string());
        }
        if self.buy.panic.rsi_divider <= Decimal::ZERO {
            errors.push("buy: panic.rsi_divider must be > 0".to_string());
        }

        if self.sell.min_signal_count == 0 || self.sell.min_signal_count > 3 {
            errors.push("sell: min_signal_count must be in 1..=3".to_string());
        }
        if self.sell.post_allocation_from_end == 0
            || self.sell.post_allocation_from_end > self.allocation.tiers.len()
        {
            errors.push(format!(
                "sell: post_allocation_from_end must be in 1..={}",
                self.allocation.tiers.len()
            ));
        }

        if self.allocation.tiers.is_empty() {
            errors.push("allocation: tiers must not be empty".to_string());
        }
        for pair in self.allocation.tiers.windows(2) {
            if pair[0].min_score <= pair[1].min_score {
                errors.push(
                    "allocation: tiers must be sorted descending by min_score".to_string(),
                );
                break;
            }
        }
        for (i, tier) in self.allocation.tiers.iter().enumerate() {
            if let Err(e) = tier.split.validate() {
                errors.push(format!("allocation: tiers[{}]: {}", i, e));
            }
        }
        if let Err(e) = self.allocation.base.validate() {
            errors.push(format!("allocation: base: {}", e));
        }

        let tr = &self.trading;
        if tr.max_loan_to_collateral <= Decimal::ZERO || tr.max_loan_to_collateral > Decimal::ONE {
            errors.push("trading: max_loan_to_collateral must be in (0, 1]".to_string());
        }
        if tr.hard_borrow_limit <= Decimal::ZERO {
            errors.push("trading: hard_borrow_limit must be > 0".to_string());
        }
        if tr.margin_call_threshold >= th.defend_trigger {
            errors.push("trading: margin_call_threshold must be < defend_trigger".to_string());
        }
        if tr.annual_interest_rate < Decimal::ZERO || tr.annual_interest_rate > Decimal::ONE {
            errors.push("trading: annual_interest_rate must be in [0, 1]".to_string());
        }
        if tr.min_action_amount < Decimal::ZERO {
            errors.push("trading: min_action_amount must be >= 0".to_string());
        }

        for pair in self.reserve.tiers.windows(2) {
            if pair[0].max_net_asset >= pair[1].max_net_asset {
                errors.push(
                    "reserve: tiers must be sorted ascending by max_net_asset".to_string(),
                );
                break;
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Target allocation for an entry score: first tier (descending by
    /// `min_score`) whose threshold the score meets, else the base row.
    pub fn allocation_for_score(&self, score: i32) -> (&AllocationSplit, AllocationTierKind) {
        for tier in &self.allocation.tiers {
            if score >= tier.min_score {
                let kind = if score >= self.thresholds.score_aggressive {
                    AllocationTierKind::Aggressive
                } else if score >= self.thresholds.score_active {
                    AllocationTierKind::Active
                } else {
                    AllocationTierKind::Base
                };
                return (&tier.split, kind);
            }
        }
        (&self.allocation.base, AllocationTierKind::Base)
    }

    /// Allocation the portfolio falls back to after a take-profit sale,
    /// counted from the end of the tier table.
    pub fn post_sale_allocation(&self) -> &AllocationSplit {
        let idx = self.allocation.tiers.len() - self.sell.post_allocation_from_end;
        &self.allocation.tiers[idx].split
    }

    /// Drop threshold that qualifies as "extreme" for the panic-buy gate:
    /// the rank-N drop rule by descending threshold.
    pub fn extreme_drop_threshold(&self) -> Decimal {
        let rank = self.buy.panic.min_drop_rank.min(self.buy.drop_rules.len());
        self.buy.drop_rules[rank - 1].min_drop
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSettings {
    /// Maintenance margin below this is imminent margin-call territory.
    pub mm_danger: Decimal,
    /// Maintenance margin below this triggers the defender.
    pub defend_trigger: Decimal,
    /// The defender deleverages until margin recovers to this level.
    pub defend_target: Decimal,
    pub rsi_overheat_level: Decimal,
    pub stoch_d_overheat_level: Decimal,
    pub bias_overheat_level: Decimal,
    /// How many of the three overheat factors must be hot.
    pub overheat_count: usize,
    pub rsi_reversal_level: Decimal,
    pub stoch_reversal_level: Decimal,
    /// How many of the four reversal triggers pause accumulation.
    pub reversal_trigger_count: usize,
    /// Leveraged-value / net-asset ceiling that forces a rebalance.
    pub exposure_ceiling: Decimal,
    pub target_exposure_ratio: Decimal,
    /// Scheduled-checkpoint rebalance floor and tolerance band.
    pub min_rebalance_ratio: Decimal,
    pub rebalance_tolerance: Decimal,
    pub score_active: i32,
    pub score_aggressive: i32,
    pub vix_panic: Decimal,
    pub vix_extreme: Decimal,
    /// Lookback window (periods) for level-crossing signal checks.
    pub signal_lookback: usize,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            mm_danger: dec!(140),
            defend_trigger: dec!(160),
            defend_target: dec!(180),
            rsi_overheat_level: dec!(75),
            stoch_d_overheat_level: dec!(85),
            bias_overheat_level: dec!(25),
            overheat_count: 2,
            rsi_reversal_level: dec!(60),
            stoch_reversal_level: dec!(70),
            reversal_trigger_count: 2,
            exposure_ceiling: dec!(0.65),
            target_exposure_ratio: dec!(0.5),
            min_rebalance_ratio: dec!(0.2),
            rebalance_tolerance: dec!(0.1),
            score_active: 5,
            score_aggressive: 7,
            vix_panic: dec!(30),
            vix_extreme: dec!(40),
            signal_lookback: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropRule {
    pub min_drop: Decimal,
    pub score: i32,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsiEntryRule {
    pub oversold: Decimal,
    pub score: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacdEntryRule {
    pub score: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StochEntryRule {
    pub oversold_k: Decimal,
    pub score: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanicSettings {
    /// Which drop rule (rank by descending threshold) counts as extreme.
    pub min_drop_rank: usize,
    /// Extreme RSI = oversold level divided by this.
    pub rsi_divider: Decimal,
    /// One-off leverage fraction applied on a panic buy.
    pub suggested_leverage: Decimal,
}

impl Default for PanicSettings {
    fn default() -> Self {
        Self {
            min_drop_rank: 2,
            rsi_divider: dec!(1.6),
            suggested_leverage: dec!(0.3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuySettings {
    pub min_drop_pct: Decimal,
    pub min_score: i32,
    /// Sorted descending by min_drop; the first matching rule wins.
    pub drop_rules: Vec<DropRule>,
    pub rsi: RsiEntryRule,
    pub macd: MacdEntryRule,
    pub stochastic: StochEntryRule,
    pub panic: PanicSettings,
}

impl Default for BuySettings {
    fn default() -> Self {
        Self {
            min_drop_pct: dec!(10),
            min_score: 4,
            drop_rules: vec![
                DropRule { min_drop: dec!(40), score: 5, label: "crash".to_string() },
                DropRule { min_drop: dec!(30), score: 4, label: "severe".to_string() },
                DropRule { min_drop: dec!(20), score: 3, label: "deep".to_string() },
                DropRule { min_drop: dec!(10), score: 2, label: "mild".to_string() },
            ],
            rsi: RsiEntryRule { oversold: dec!(30), score: 2 },
            macd: MacdEntryRule { score: 2 },
            stochastic: StochEntryRule { oversold_k: dec!(25), score: 2 },
            panic: PanicSettings::default(),
        }
    }
}

/// What happens to the cash left over after a take-profit or rebalance sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProceedsPolicy {
    ReinvestCollateral,
    HoldCash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellSettings {
    pub rsi_overbought: Decimal,
    pub stoch_overbought_k: Decimal,
    pub min_up_pct: Decimal,
    pub min_signal_count: usize,
    /// Post-sale allocation row, counted from the end of the tier table.
    pub post_allocation_from_end: usize,
    pub proceeds: ProceedsPolicy,
}

impl Default for SellSettings {
    fn default() -> Self {
        Self {
            rsi_overbought: dec!(75),
            stoch_overbought_k: dec!(80),
            min_up_pct: dec!(30),
            min_signal_count: 2,
            post_allocation_from_end: 2,
            proceeds: ProceedsPolicy::ReinvestCollateral,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationSplit {
    /// Target borrow ratio (loan / net asset).
    pub leverage: Decimal,
    pub cash: Decimal,
    pub label: String,
}

impl AllocationSplit {
    pub fn validate(&self) -> Result<(), String> {
        if self.leverage < Decimal::ZERO || self.leverage > Decimal::ONE {
            return Err("leverage must be in [0, 1]".to_string());
        }
        if self.cash < Decimal::ZERO || self.cash > Decimal::ONE {
            return Err("cash must be in [0, 1]".to_string());
        }
        if self.leverage + self.cash != Decimal::ONE {
            return Err("leverage + cash must equal 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationTier {
    pub min_score: i32,
    #[serde(flatten)]
    pub split: AllocationSplit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationSettings {
    /// Sorted descending by min_score.
    pub tiers: Vec<AllocationTier>,
    /// Fallback row for scores below every tier.
    pub base: AllocationSplit,
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            tiers: vec![
                AllocationTier {
                    min_score: 9,
                    split: AllocationSplit {
                        leverage: dec!(0.5),
                        cash: dec!(0.5),
                        label: "all-in pullback".to_string(),
                    },
                },
                AllocationTier {
                    min_score: 7,
                    split: AllocationSplit {
                        leverage: dec!(0.4),
                        cash: dec!(0.6),
                        label: "aggressive".to_string(),
                    },
                },
                AllocationTier {
                    min_score: 5,
                    split: AllocationSplit {
                        leverage: dec!(0.3),
                        cash: dec!(0.7),
                        label: "active".to_string(),
                    },
                },
                AllocationTier {
                    min_score: 4,
                    split: AllocationSplit {
                        leverage: dec!(0.2),
                        cash: dec!(0.8),
                        label: "starter".to_string(),
                    },
                },
            ],
            base: AllocationSplit {
                leverage: dec!(0.15),
                cash: dec!(0.85),
                label: "base".to_string(),
            },
        }
    }
}

/// When the accumulation cooldown clock restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownReset {
    /// Any borrow event stamps the date, panic buys included.
    AnyBorrow,
    /// Only tiered accumulation stamps the date.
    ExposureIncrease,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSettings {
    pub cooldown_days: i64,
    /// A score at or above this overrides an active cooldown.
    pub cooldown_override_score: i32,
    pub cooldown_reset: CooldownReset,
    pub min_action_amount: Decimal,
    pub max_loan_to_collateral: Decimal,
    /// Borrow ratio above this forces deleverage regardless of signals.
    pub hard_borrow_limit: Decimal,
    /// Fallback repay target when the hard borrow limit is breached.
    pub hard_limit_repay_ratio: Decimal,
    /// Broker floor: maintenance margin below this liquidates the
    /// leveraged position outright.
    pub margin_call_threshold: Decimal,
    pub annual_interest_rate: Decimal,
    pub fee_rate: Decimal,
    pub tax_rate: Decimal,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            cooldown_days: 20,
            cooldown_override_score: 9,
            cooldown_reset: CooldownReset::AnyBorrow,
            min_action_amount: dec!(10000),
            max_loan_to_collateral: dec!(0.6),
            hard_borrow_limit: dec!(1.0),
            hard_limit_repay_ratio: dec!(0.9),
            margin_call_threshold: dec!(135),
            annual_interest_rate: dec!(0.025),
            // 1.425 per mille brokerage at a 40% discount
            fee_rate: dec!(0.000855),
            tax_rate: dec!(0.003),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveTier {
    pub max_net_asset: Decimal,
    pub ratio: Decimal,
}

/// Tiered reserve-cash policy: smaller portfolios hold proportionally more
/// reserve against margin calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveSettings {
    /// Sorted ascending by max_net_asset; the first tier covering the net
    /// asset applies. Net assets above every tier use `default_ratio`.
    pub tiers: Vec<ReserveTier>,
    pub default_ratio: Decimal,
    /// Achievement below this fraction of target counts as insufficient.
    pub sufficiency_pct: Decimal,
}

impl Default for ReserveSettings {
    fn default() -> Self {
        Self {
            tiers: vec![
                ReserveTier { max_net_asset: dec!(1000000), ratio: dec!(0.15) },
                ReserveTier { max_net_asset: dec!(5000000), ratio: dec!(0.12) },
            ],
            default_ratio: dec!(0.1),
            sufficiency_pct: dec!(80),
        }
    }
}

impl ReserveSettings {
    pub fn target_ratio(&self, net_asset: Decimal) -> Decimal {
        for tier in &self.tiers {
            if net_asset <= tier.max_net_asset {
                return tier.ratio;
            }
        }
        self.default_ratio
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationTierKind {
    Base,
    Active,
    Aggressive,
}

impl std::fmt::Display for AllocationTierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AllocationTierKind::Base => "base",
            AllocationTierKind::Active => "active",
            AllocationTierKind::Aggressive => "aggressive",
        };
        write!(f, "{}", s)
    }
}
