use rust_decimal::Decimal;

use crate::types::{MacdPoint, StochPoint};

/// Last two values of a series, oldest first.
pub fn last_two<T: Copy>(series: &[T]) -> Option<(T, T)> {
    if series.len() < 2 {
        return None;
    }
    Some((series[series.len() - 2], series[series.len() - 1]))
}

/// True if the series was at or below `level` somewhere in the last
/// `lookback` periods and the current value is strictly above it. With
/// `require_cross_today` the crossing itself must be the latest bar.
pub fn rose_above_after_below(
    series: &[Decimal],
    level: Decimal,
    lookback: usize,
    require_cross_today: bool,
) -> bool {
    let Some((prev, curr)) = last_two(series) else {
        return false;
    };
    if curr <= level {
        return false;
    }
    if require_cross_today {
        return prev <= level;
    }
    let window = &series[series.len().saturating_sub(lookback)..];
    window.iter().any(|v| *v <= level)
}

/// Mirror of `rose_above_after_below`: at or above `level` within the
/// window, currently strictly below it.
pub fn fell_below_after_above(
    series: &[Decimal],
    level: Decimal,
    lookback: usize,
    require_cross_today: bool,
) -> bool {
    let Some((prev, curr)) = last_two(series) else {
        return false;
    };
    if curr >= level {
        return false;
    }
    if require_cross_today {
        return prev >= level;
    }
    let window = &series[series.len().saturating_sub(lookback)..];
    window.iter().any(|v| *v >= level)
}

/// Any value in the lookback window strictly below `level`.
pub fn was_below_level(series: &[Decimal], level: Decimal, lookback: usize) -> bool {
    let window = &series[series.len().saturating_sub(lookback)..];
    window.iter().any(|v| *v < level)
}

/// Bullish MACD cross: fast line moves above signal with a positive histogram.
pub fn macd_cross_up(series: &[MacdPoint]) -> bool {
    let Some((prev, curr)) = last_two(series) else {
        return false;
    };
    prev.macd <= prev.signal && curr.macd > curr.signal && curr.histogram > Decimal::ZERO
}

pub fn macd_cross_down(series: &[MacdPoint]) -> bool {
    let Some((prev, curr)) = last_two(series) else {
        return false;
    };
    prev.macd >= prev.signal && curr.macd < curr.signal
}

pub fn stoch_cross_up(series: &[StochPoint]) -> bool {
    let Some((prev, curr)) = last_two(series) else {
        return false;
    };
    prev.k <= prev.d && curr.k > curr.d
}

pub fn stoch_cross_down(series: &[StochPoint]) -> bool {
    let Some((prev, curr)) = last_two(series) else {
        return false;
    };
    prev.k >= prev.d && curr.k < curr.d
}

/// Project one component out of the stochastic series.
pub fn stoch_series(series: &[StochPoint], f: impl Fn(&StochPoint) -> Decimal) -> Vec<Decimal> {
    series.iter().map(f).collect()
}
