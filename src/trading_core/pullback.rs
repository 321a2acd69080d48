//! Higher-timeframe pullback validation
//!
//! Tracks the running extreme of the leg and counts consecutive counter-colour
//! candles printing inside it. A new extreme resets the count. The pullback is
//! confirmed by either enough counter candles or a deep enough retracement
//! toward the protected level.

use serde::Serialize;

use super::candles::{Candle, Trend};

const EPSILON: f64 = 1e-9;

/// Result of a confirmed pullback, indices relative to the scanned slice
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PullbackConfirmation {
    /// Candle that confirmed the pullback
    pub index: usize,
    /// Leg extreme (swing high when bullish, swing low when bearish)
    pub extreme: f64,
    pub extreme_index: usize,
}

/// Incremental pullback tracker
#[derive(Debug, Clone)]
pub struct PullbackState {
    trend: Trend,
    protected: f64,
    min_candles: usize,
    retrace_pct: f64,
    candidate_extreme: Option<f64>,
    extreme_index: usize,
    opposite_count: usize,
}

impl PullbackState {
    pub fn new(trend: Trend, protected: f64, min_candles: usize, retrace_pct: f64) -> Self {
        Self {
            trend,
            protected,
            min_candles,
            retrace_pct,
            candidate_extreme: None,
            extreme_index: 0,
            opposite_count: 0,
        }
    }

    pub fn opposite_count(&self) -> usize {
        self.opposite_count
    }

    /// Feed the next candle; returns a confirmation once the pullback qualifies
    pub fn process_candle(&mut self, index: usize, candle: &Candle) -> Option<PullbackConfirmation> {
        let extreme = match self.candidate_extreme {
            None => {
                self.set_extreme(index, candle);
                return None;
            }
            Some(extreme) => extreme,
        };

        let (new_extreme, counter, retrace) = match self.trend {
            Trend::Bullish => (
                candle.high > extreme,
                candle.is_bearish() && candle.high < extreme,
                (extreme - candle.low) / (extreme - self.protected).max(EPSILON),
            ),
            Trend::Bearish => (
                candle.low < extreme,
                candle.is_bullish() && candle.low > extreme,
                (candle.high - extreme) / (self.protected - extreme).max(EPSILON),
            ),
        };

        if new_extreme {
            self.set_extreme(index, candle);
            return None;
        }

        if counter {
            self.opposite_count += 1;
        } else {
            self.opposite_count = 0;
        }

        if self.opposite_count >= self.min_candles || retrace >= self.retrace_pct {
            return Some(PullbackConfirmation {
                index,
                extreme,
                extreme_index: self.extreme_index,
            });
        }
        None
    }

    fn set_extreme(&mut self, index: usize, candle: &Candle) {
        self.candidate_extreme = Some(match self.trend {
            Trend::Bullish => candle.high,
            Trend::Bearish => candle.low,
        });
        self.extreme_index = index;
        self.opposite_count = 0;
    }
}

/// Scan `candles` for the first confirmed pullback
pub fn confirm_pullback(
    candles: &[Candle],
    trend: Trend,
    protected: f64,
    min_candles: usize,
    retrace_pct: f64,
) -> Option<PullbackConfirmation> {
    let mut state = PullbackState::new(trend, protected, min_candles, retrace_pct);
    candles
        .iter()
        .enumerate()
        .find_map(|(i, c)| state.process_candle(i, c))
}
