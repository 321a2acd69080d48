//! Micro-structure context on the execution timeframe
//!
//! Once a POI is tapped, the execution candles since the higher-timeframe
//! pullback are run through a small swing tracker in the *opposite* trend.
//! The protection price is the opposite extreme of that tracking: the last
//! confirmed lower high while price falls into a demand POI, the last
//! confirmed higher low while it rallies into a supply POI.
//! [`MicroTracker`] then follows that level candle by candle: a confirmed
//! push through it ratchets it (micro-BOS), a close back across it is the
//! micro-CHOCH that triggers trade planning.

use super::candles::{Candle, Trend};

const EPSILON: f64 = 1e-9;

/// Derive the protection price from `slice`, tracked in `opposite` trend.
///
/// While tracking bearish, a new low after a confirmed pullback promotes the
/// highest high since the previous low to the protected swing high. Before any
/// confirmation the leg origin stands in. Bullish tracking mirrors this with
/// swing lows.
///
/// Returns `None` when no pullback confirmed or the price is not positive.
pub fn micro_protection(slice: &[Candle], opposite: Trend, min_candles: usize, retrace_pct: f64) -> Option<f64> {
    let first = slice.first()?;
    // extreme: impulse end, origin: protected candidate, counter: pullback extreme
    let (mut extreme, mut origin, mut counter) = match opposite {
        Trend::Bearish => (first.low, first.high, first.high),
        Trend::Bullish => (first.high, first.low, first.low),
    };
    let mut count = 0usize;
    let mut confirmed = false;
    let mut protected = None;

    for candle in &slice[1..] {
        let (new_extreme, is_counter) = match opposite {
            Trend::Bearish => (candle.low < extreme, candle.is_bullish()),
            Trend::Bullish => (candle.high > extreme, candle.is_bearish()),
        };

        if new_extreme {
            if confirmed {
                origin = counter;
                protected = Some(origin);
            } else {
                origin = match opposite {
                    Trend::Bearish => origin.max(candle.high),
                    Trend::Bullish => origin.min(candle.low),
                };
            }
            (extreme, counter) = match opposite {
                Trend::Bearish => (candle.low, candle.high),
                Trend::Bullish => (candle.high, candle.low),
            };
            count = 0;
            confirmed = false;
            continue;
        }

        let retrace = match opposite {
            Trend::Bearish => {
                counter = counter.max(candle.high);
                (candle.high - extreme) / (origin - extreme).max(EPSILON)
            }
            Trend::Bullish => {
                counter = counter.min(candle.low);
                (extreme - candle.low) / (extreme - origin).max(EPSILON)
            }
        };
        count = if is_counter { count + 1 } else { 0 };
        if count >= min_candles || retrace >= retrace_pct {
            confirmed = true;
            protected = Some(origin);
        }
    }

    protected.filter(|level| *level > 0.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MicroSignal {
    /// Confirmed push through the level; it moved from `previous` to `level`
    Bos { previous: f64, level: f64 },
    /// Close back across the level
    Choch { broken_level: f64 },
}

/// Follows the micro protection level for an active POI.
///
/// `trend` is the higher-timeframe trend. When bullish the level is a swing
/// high: bearish candles count as the pullback, a close below the level is the
/// CHOCH, and a high above it after enough pullback candles ratchets the level
/// up to that high. Everything mirrors when bearish.
#[derive(Debug, Clone)]
pub struct MicroTracker {
    trend: Trend,
    level: f64,
    pullback_count: usize,
    min_candles: usize,
}

impl MicroTracker {
    pub fn new(trend: Trend, level: f64, min_candles: usize) -> Self {
        Self {
            trend,
            level,
            pullback_count: 0,
            min_candles,
        }
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn process_candle(&mut self, candle: &Candle) -> Option<MicroSignal> {
        let (crossed_back, is_pullback, poked) = match self.trend {
            Trend::Bullish => (candle.close < self.level, candle.is_bearish(), candle.low < self.level),
            Trend::Bearish => (candle.close > self.level, candle.is_bullish(), candle.high > self.level),
        };

        if crossed_back {
            return Some(MicroSignal::Choch { broken_level: self.level });
        }
        if is_pullback {
            self.pullback_count += 1;
        } else if poked && self.pullback_count < self.min_candles {
            self.pullback_count = 0;
        }

        if self.pullback_count < self.min_candles {
            return None;
        }
        let pushed = match self.trend {
            Trend::Bullish => (candle.high > self.level).then_some(candle.high),
            Trend::Bearish => (candle.low < self.level).then_some(candle.low),
        };
        let level = pushed?;
        let previous = self.level;
        self.level = level;
        self.pullback_count = 0;
        Some(MicroSignal::Bos { previous, level })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::test_support::{at_min, bear, bull};

    #[test]
    fn test_protection_confirms_on_counter_candles() {
        let slice = vec![
            bear(at_min(0), 1.10, 1.12),
            bear(at_min(5), 1.08, 1.105),
            bull(at_min(10), 1.085, 1.095),
            bull(at_min(15), 1.09, 1.10),
        ];
        // swing high of the bearish leg, not the low it printed
        assert_eq!(micro_protection(&slice, Trend::Bearish, 2, 0.9), Some(1.12));
    }

    #[test]
    fn test_protection_confirms_on_deep_retrace() {
        let slice = vec![
            bull(at_min(0), 1.00, 1.02),
            bull(at_min(5), 1.01, 1.05),
            // (1.05 - 1.004) / (1.05 - 1.00) = 0.92
            bear(at_min(10), 1.004, 1.04),
        ];
        assert_eq!(micro_protection(&slice, Trend::Bullish, 2, 0.9), Some(1.00));
    }

    #[test]
    fn test_protection_promotes_lower_high_on_new_low() {
        let slice = vec![
            bear(at_min(0), 1.040, 1.046),
            bear(at_min(5), 1.032, 1.042),
            bull(at_min(10), 1.033, 1.038),
            bull(at_min(15), 1.034, 1.040),
            bear(at_min(20), 1.028, 1.039),
        ];
        assert_eq!(micro_protection(&slice, Trend::Bearish, 2, 0.9), Some(1.042));
        // before the break the leg origin is still the protected high
        assert_eq!(micro_protection(&slice[..4], Trend::Bearish, 2, 0.9), Some(1.046));
    }

    #[test]
    fn test_protection_none_without_swing() {
        let slice: Vec<Candle> = (0..6)
            .map(|i| {
                let top = 1.10 - 0.005 * i as f64;
                bear(at_min(i * 5), top - 0.006, top)
            })
            .collect();
        assert_eq!(micro_protection(&slice, Trend::Bearish, 2, 0.9), None);
        assert_eq!(micro_protection(&[], Trend::Bearish, 2, 0.9), None);
    }

    #[test]
    fn test_tracker_bos_then_choch() {
        let mut tracker = MicroTracker::new(Trend::Bullish, 1.10, 2);

        assert_eq!(tracker.process_candle(&bear(at_min(5), 1.102, 1.108)), None);
        let bos = tracker.process_candle(&bear(at_min(10), 1.101, 1.106));
        assert_eq!(bos, Some(MicroSignal::Bos { previous: 1.10, level: 1.106 }));
        assert_eq!(tracker.level(), 1.106);

        assert_eq!(tracker.process_candle(&bull(at_min(15), 1.104, 1.112)), None);
        let choch = tracker.process_candle(&bear(at_min(20), 1.095, 1.105));
        assert_eq!(choch, Some(MicroSignal::Choch { broken_level: 1.106 }));
    }

    #[test]
    fn test_tracker_single_counter_candle_resets() {
        let mut tracker = MicroTracker::new(Trend::Bearish, 1.20, 2);

        assert_eq!(tracker.process_candle(&bull(at_min(5), 1.190, 1.198)), None);
        // poke above the level after one pullback candle
        assert_eq!(tracker.process_candle(&bear(at_min(10), 1.185, 1.205)), None);
        assert_eq!(tracker.process_candle(&bull(at_min(15), 1.186, 1.196)), None);
        assert_eq!(tracker.level(), 1.20);

        let bos = tracker.process_candle(&bull(at_min(20), 1.180, 1.195));
        assert_eq!(bos, Some(MicroSignal::Bos { previous: 1.20, level: 1.180 }));
    }
}
