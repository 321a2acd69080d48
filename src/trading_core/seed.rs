//! Seed detector
//!
//! Bootstraps the first directional bias from a fixed lookback window of the
//! higher timeframe:
//! 1. Window extremes pick a temporary trend (the more recent extreme wins)
//! 2. The first shallow counter-candle after the window confirms a pullback
//! 3. The first break of the window high/low either confirms the trend (BOS)
//!    or flips it (CHOCH)

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::candles::{Candle, Trend};
use super::error::AnalysisError;

/// Break type that resolved the seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BreakKind {
    Bos,
    Choch,
}

impl std::fmt::Display for BreakKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakKind::Bos => write!(f, "BOS"),
            BreakKind::Choch => write!(f, "CHOCH"),
        }
    }
}

/// Resolved seed: where mapping starts and in which direction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Seed {
    /// Higher-timeframe index the mapper re-anchors at
    pub start_index: usize,
    pub trend: Trend,
    /// Trend implied by the window extremes before the break
    pub temp_trend: Trend,
    pub break_kind: BreakKind,
    pub break_index: usize,
    pub break_time: DateTime<Utc>,
    pub seed_high: f64,
    pub seed_low: f64,
    pub pullback_index: usize,
    pub pullback_high: f64,
    pub pullback_low: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedOutcome {
    Seeded(Seed),
    /// No valid pullback after the window
    NoPullback,
    /// Pullback found but the window high/low never broke
    NoBreak,
}

struct Pullback {
    index: usize,
    high: f64,
    low: f64,
}

/// Run seed detection over the higher-timeframe candles
pub fn detect_seed(candles: &[Candle], window: usize) -> Result<SeedOutcome, AnalysisError> {
    let needed = window + 5;
    if candles.len() < needed {
        return Err(AnalysisError::InsufficientData {
            what: "seed detection",
            needed,
            got: candles.len(),
        });
    }

    let seed_window = &candles[..window];
    let (high_idx, seed_high) = seed_window
        .iter()
        .enumerate()
        .fold((0, f64::MIN), |best, (i, c)| if c.high > best.1 { (i, c.high) } else { best });
    let (low_idx, seed_low) = seed_window
        .iter()
        .enumerate()
        .fold((0, f64::MAX), |best, (i, c)| if c.low < best.1 { (i, c.low) } else { best });

    let temp_trend = if seed_window[high_idx].time > seed_window[low_idx].time {
        Trend::Bullish
    } else {
        Trend::Bearish
    };
    info!(
        "Seed window: high {:.5} low {:.5} -> temp trend {}",
        seed_high, seed_low, temp_trend
    );

    let Some(pullback) = find_pullback(candles, window, temp_trend) else {
        info!("Seed: no pullback after window");
        return Ok(SeedOutcome::NoPullback);
    };
    info!(
        "Seed pullback confirmed at {}: high {:.5} low {:.5}",
        candles[pullback.index].time, pullback.high, pullback.low
    );

    for (j, candle) in candles.iter().enumerate().skip(pullback.index + 1) {
        let breaks_high = candle.high > seed_high;
        let breaks_low = candle.low < seed_low;

        let resolved = match temp_trend {
            Trend::Bullish if breaks_high => Some((BreakKind::Bos, Trend::Bullish)),
            Trend::Bullish if breaks_low => Some((BreakKind::Choch, Trend::Bearish)),
            Trend::Bearish if breaks_low => Some((BreakKind::Bos, Trend::Bearish)),
            Trend::Bearish if breaks_high => Some((BreakKind::Choch, Trend::Bullish)),
            _ => None,
        };

        if let Some((break_kind, trend)) = resolved {
            info!("Seed {} at {} -> {}", break_kind, candle.time, trend);
            return Ok(SeedOutcome::Seeded(Seed {
                start_index: pullback.index,
                trend,
                temp_trend,
                break_kind,
                break_index: j,
                break_time: candle.time,
                seed_high,
                seed_low,
                pullback_index: pullback.index,
                pullback_high: pullback.high,
                pullback_low: pullback.low,
            }));
        }
    }

    info!("Seed: window high/low never broken");
    Ok(SeedOutcome::NoBreak)
}

/// First counter-candle after the window that pierces the previous candle
/// without breaching it. A breach resets the scan.
fn find_pullback(candles: &[Candle], window: usize, trend: Trend) -> Option<Pullback> {
    for i in window.max(1)..candles.len() {
        let prev = &candles[i - 1];
        let candle = &candles[i];

        let (is_pullback, breached) = match trend {
            Trend::Bullish => (
                candle.is_bearish() && candle.low < prev.high,
                candle.high > prev.high,
            ),
            Trend::Bearish => (
                candle.is_bullish() && candle.high > prev.low,
                candle.low < prev.low,
            ),
        };

        if !is_pullback {
            continue;
        }
        if breached {
            debug!("Seed pullback at {} breached protected level, restarting", candle.time);
            continue;
        }

        return Some(Pullback {
            index: i,
            high: candle.high,
            low: candle.low,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::test_support::{at, bear, bull};

    /// 60 rising candles, so the window high is more recent than its low
    fn rising_window() -> Vec<Candle> {
        (0..60)
            .map(|i| {
                let low = 1.0 + 0.001 * i as f64;
                bull(at(i * 4), low, low + 0.002)
            })
            .collect()
    }

    #[test]
    fn test_seed_bullish_bos() {
        let mut candles = rising_window();
        // inside bearish candle → pullback
        candles.push(bear(at(240), 1.058, 1.0605));
        // breaks the window high of 1.061
        candles.push(bull(at(244), 1.059, 1.065));
        for k in 0..4 {
            candles.push(bull(at(248 + k * 4), 1.062, 1.066));
        }

        let SeedOutcome::Seeded(seed) = detect_seed(&candles, 60).unwrap() else {
            panic!("expected a seed");
        };
        assert_eq!(seed.temp_trend, Trend::Bullish);
        assert_eq!(seed.pullback_index, 60);
        assert_eq!(seed.break_kind, BreakKind::Bos);
        assert_eq!(seed.trend, Trend::Bullish);
        assert_eq!(seed.break_index, 61);
        assert_eq!(seed.break_time, at(244));
        assert_eq!(seed.start_index, 60);
    }

    #[test]
    fn test_seed_choch_flips_trend() {
        let mut candles = rising_window();
        candles.push(bear(at(240), 1.058, 1.0605));
        // straight through the window low
        candles.push(bear(at(244), 0.995, 1.058));
        for k in 0..4 {
            candles.push(bear(at(248 + k * 4), 0.99, 0.996));
        }

        let SeedOutcome::Seeded(seed) = detect_seed(&candles, 60).unwrap() else {
            panic!("expected a seed");
        };
        assert_eq!(seed.break_kind, BreakKind::Choch);
        assert_eq!(seed.trend, Trend::Bearish);
    }

    #[test]
    fn test_seed_breached_pullback_restarts() {
        let mut candles = rising_window();
        // bearish but prints above the previous high → not a valid pullback
        candles.push(bear(at(240), 1.059, 1.063));
        candles.push(bear(at(244), 1.060, 1.0625));
        candles.push(bull(at(248), 1.061, 1.07));
        for k in 0..3 {
            candles.push(bull(at(252 + k * 4), 1.065, 1.071));
        }

        let SeedOutcome::Seeded(seed) = detect_seed(&candles, 60).unwrap() else {
            panic!("expected a seed");
        };
        assert_eq!(seed.pullback_index, 61);
        assert_eq!(seed.break_index, 62);
    }

    #[test]
    fn test_seed_no_break() {
        let mut candles = rising_window();
        candles.push(bear(at(240), 1.058, 1.0605));
        for k in 0..5 {
            candles.push(bull(at(244 + k * 4), 1.055, 1.060));
        }
        assert_eq!(detect_seed(&candles, 60).unwrap(), SeedOutcome::NoBreak);
    }

    #[test]
    fn test_seed_needs_window_plus_five() {
        let candles = rising_window();
        let err = detect_seed(&candles, 60).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData { needed: 65, got: 60, .. }));
    }
}
