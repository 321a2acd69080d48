//! Point-of-interest detection over one structural leg
//!
//! Two zone types are produced:
//! - Order blocks: a candle followed by a same-direction displacement candle
//!   at least `ob_multiplier` times its range, never traded back through
//! - Liquidity pools: a prior extreme approached by an all counter-coloured
//!   pullback that retraced at least half way, never re-tapped before leg end

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::candles::{Candle, Trend};

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PoiKind {
    #[serde(rename = "OB")]
    OrderBlock,
    #[serde(rename = "LIQ")]
    Liquidity,
}

impl std::fmt::Display for PoiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoiKind::OrderBlock => write!(f, "OB"),
            PoiKind::Liquidity => write!(f, "LIQ"),
        }
    }
}

/// Price footprint of a POI
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum PoiZone {
    #[serde(rename = "OB")]
    OrderBlock { price_low: f64, price_high: f64 },
    #[serde(rename = "LIQ")]
    Liquidity { price: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoiState {
    Active,
    Invalidated,
    /// Tapped and resolved by a micro-CHOCH
    Consumed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Poi {
    pub trend: Trend,
    pub time: DateTime<Utc>,
    /// Higher-timeframe candle index the zone is anchored at
    pub index: usize,
    #[serde(flatten)]
    pub zone: PoiZone,
    pub state: PoiState,
}

impl Poi {
    pub fn kind(&self) -> PoiKind {
        match self.zone {
            PoiZone::OrderBlock { .. } => PoiKind::OrderBlock,
            PoiZone::Liquidity { .. } => PoiKind::Liquidity,
        }
    }

    /// Lower bound of the zone (the pool price for liquidity)
    pub fn price_low(&self) -> f64 {
        match self.zone {
            PoiZone::OrderBlock { price_low, .. } => price_low,
            PoiZone::Liquidity { price } => price,
        }
    }

    /// Upper bound of the zone (the pool price for liquidity)
    pub fn price_high(&self) -> f64 {
        match self.zone {
            PoiZone::OrderBlock { price_high, .. } => price_high,
            PoiZone::Liquidity { price } => price,
        }
    }

    /// Whether price reached the zone on this candle
    pub fn is_tapped_by(&self, candle: &Candle) -> bool {
        match (self.zone, self.trend) {
            (PoiZone::OrderBlock { price_low, price_high }, _) => {
                candle.low <= price_high && candle.high >= price_low
            }
            (PoiZone::Liquidity { price }, Trend::Bullish) => candle.low <= price,
            (PoiZone::Liquidity { price }, Trend::Bearish) => candle.high >= price,
        }
    }

    /// Whether any of `candles` traded through the zone's far edge.
    /// Monotonic: extending `candles` can only turn false into true.
    pub fn is_mitigated_by(&self, candles: &[Candle]) -> bool {
        match (self.zone, self.trend) {
            (PoiZone::OrderBlock { price_low, .. }, Trend::Bullish) => {
                candles.iter().any(|c| c.low < price_low)
            }
            (PoiZone::OrderBlock { price_high, .. }, Trend::Bearish) => {
                candles.iter().any(|c| c.high > price_high)
            }
            (PoiZone::Liquidity { price }, Trend::Bullish) => candles.iter().any(|c| c.low <= price),
            (PoiZone::Liquidity { price }, Trend::Bearish) => candles.iter().any(|c| c.high >= price),
        }
    }
}

impl std::fmt::Display for Poi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.zone {
            PoiZone::OrderBlock { price_low, price_high } => {
                write!(f, "{} OB {:.5}-{:.5} @ {}", self.trend, price_low, price_high, self.time)
            }
            PoiZone::Liquidity { price } => write!(f, "{} LIQ {:.5} @ {}", self.trend, price, self.time),
        }
    }
}

/// Detect all POIs in `leg`. `base_index` is the series index of `leg[0]`.
pub fn detect_pois(
    leg: &[Candle],
    trend: Trend,
    ob_multiplier: f64,
    liq_pullback_candles: usize,
    base_index: usize,
) -> Vec<Poi> {
    let mut pois = merge_overlapping(detect_order_blocks(leg, trend, ob_multiplier, base_index));
    pois.extend(detect_liquidity(leg, trend, liq_pullback_candles, base_index));
    pois.sort_by_key(|p| p.time);
    pois
}

fn detect_order_blocks(leg: &[Candle], trend: Trend, ob_multiplier: f64, base_index: usize) -> Vec<Poi> {
    let mut obs = Vec::new();

    for i in 0..leg.len().saturating_sub(1) {
        let base = &leg[i];
        let next = &leg[i + 1];
        let base_range = base.range();
        if base_range <= 0.0 {
            continue;
        }

        let right_colour = match trend {
            Trend::Bullish => next.is_bullish(),
            Trend::Bearish => next.is_bearish(),
        };
        if !right_colour || next.range() < ob_multiplier * base_range - EPSILON {
            continue;
        }

        let poi = Poi {
            trend,
            time: base.time,
            index: base_index + i,
            zone: PoiZone::OrderBlock {
                price_low: base.low,
                price_high: base.high,
            },
            state: PoiState::Active,
        };
        if poi.is_mitigated_by(&leg[i + 2..]) {
            continue;
        }
        obs.push(poi);
    }
    obs
}

/// Merge time-ordered order blocks whose ranges overlap
fn merge_overlapping(obs: Vec<Poi>) -> Vec<Poi> {
    let mut merged: Vec<Poi> = Vec::with_capacity(obs.len());

    for ob in obs {
        if let Some(last) = merged.last_mut() {
            let overlaps = !(ob.price_high() < last.price_low() || ob.price_low() > last.price_high());
            if overlaps {
                last.zone = PoiZone::OrderBlock {
                    price_low: last.price_low().min(ob.price_low()),
                    price_high: last.price_high().max(ob.price_high()),
                };
                if ob.time < last.time {
                    last.time = ob.time;
                    last.index = ob.index;
                }
                continue;
            }
        }
        merged.push(ob);
    }
    merged
}

fn detect_liquidity(leg: &[Candle], trend: Trend, pullback_candles: usize, base_index: usize) -> Vec<Poi> {
    let mut pools: Vec<Poi> = Vec::new();
    let n = leg.len();

    for i in pullback_candles..n.saturating_sub(1) {
        let pullback = &leg[i - pullback_candles..i];
        let prior = &leg[..i - pullback_candles];
        if prior.is_empty() {
            continue;
        }

        let (all_counter, extreme, retrace) = match trend {
            Trend::Bullish => {
                let extreme = prior.iter().map(|c| c.low).fold(f64::MAX, f64::min);
                let pb_high = pullback.iter().map(|c| c.high).fold(f64::MIN, f64::max);
                (
                    pullback.iter().all(|c| c.is_bearish()),
                    extreme,
                    extreme + 0.5 * (pb_high - extreme),
                )
            }
            Trend::Bearish => {
                let extreme = prior.iter().map(|c| c.high).fold(f64::MIN, f64::max);
                let pb_low = pullback.iter().map(|c| c.low).fold(f64::MAX, f64::min);
                (
                    pullback.iter().all(|c| c.is_bullish()),
                    extreme,
                    extreme - 0.5 * (extreme - pb_low),
                )
            }
        };
        if !all_counter {
            continue;
        }

        let current = &leg[i];
        let reached = match trend {
            Trend::Bullish => current.low <= retrace,
            Trend::Bearish => current.high >= retrace,
        };
        if !reached {
            continue;
        }

        let pool = Poi {
            trend,
            time: leg[i - 1].time,
            index: base_index + i - 1,
            zone: PoiZone::Liquidity { price: extreme },
            state: PoiState::Active,
        };
        if pool.is_mitigated_by(&leg[i + 1..]) {
            continue;
        }
        if pools.iter().any(|p| (p.price_low() - extreme).abs() < EPSILON) {
            continue;
        }
        pools.push(pool);
    }
    pools
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::test_support::{at, bear, bull};
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_single_order_block_from_displacement() {
        let leg = vec![
            bull(at(0), 1.1000, 1.1010),
            bull(at(4), 1.1005, 1.1023),
            bull(at(8), 1.1020, 1.1030),
            bull(at(12), 1.1025, 1.1035),
        ];
        let pois = detect_pois(&leg, Trend::Bullish, 1.8, 2, 10);

        assert_eq!(pois.len(), 1);
        let ob = &pois[0];
        assert_eq!(ob.kind(), PoiKind::OrderBlock);
        assert_eq!(ob.index, 10);
        assert_eq!(ob.time, at(0));
        assert_eq!(ob.price_low(), 1.1000);
        assert_eq!(ob.price_high(), 1.1010);
        assert_eq!(ob.state, PoiState::Active);
    }

    #[test]
    fn test_mitigated_order_block_skipped() {
        let leg = vec![
            bull(at(0), 1.1000, 1.1010),
            bull(at(4), 1.1005, 1.1023),
            bear(at(8), 1.0995, 1.1020),
        ];
        assert!(detect_pois(&leg, Trend::Bullish, 1.8, 2, 0).is_empty());
    }

    #[test]
    fn test_overlapping_order_blocks_merge() {
        let leg = vec![
            bear(at(0), 0.9990, 1.0000),
            bear(at(4), 0.9975, 0.9993),
            bear(at(8), 0.9940, 0.9975),
            bear(at(12), 0.9935, 0.9950),
        ];
        let pois = detect_pois(&leg, Trend::Bearish, 1.8, 2, 0);

        assert_eq!(pois.len(), 1);
        assert_eq!(pois[0].time, at(0));
        assert_eq!(pois[0].price_low(), 0.9975);
        assert_eq!(pois[0].price_high(), 1.0000);
    }

    #[test]
    fn test_liquidity_pool_detected() {
        let leg = vec![
            bull(at(0), 1.00, 1.05),
            bull(at(4), 1.04, 1.10),
            bear(at(8), 1.07, 1.09),
            bear(at(12), 1.06, 1.08),
            bear(at(16), 1.04, 1.07),
            bull(at(20), 1.05, 1.12),
        ];
        let pois = detect_pois(&leg, Trend::Bullish, 1.8, 2, 0);

        let liq: Vec<_> = pois.iter().filter(|p| p.kind() == PoiKind::Liquidity).collect();
        assert_eq!(liq.len(), 1);
        assert_eq!(liq[0].price_low(), 1.00);
        assert_eq!(liq[0].time, at(12));

        let obs: Vec<_> = pois.iter().filter(|p| p.kind() == PoiKind::OrderBlock).collect();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].time, at(16));

        assert!(pois.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[test]
    fn test_tap_rules() {
        let pool = Poi {
            trend: Trend::Bearish,
            time: at(0),
            index: 0,
            zone: PoiZone::Liquidity { price: 1.2 },
            state: PoiState::Active,
        };
        assert!(pool.is_tapped_by(&bull(at(4), 1.1, 1.2)));
        assert!(!pool.is_tapped_by(&bull(at(4), 1.1, 1.19)));

        let ob = Poi {
            zone: PoiZone::OrderBlock { price_low: 1.0, price_high: 1.1 },
            ..pool
        };
        assert!(ob.is_tapped_by(&bear(at(4), 1.09, 1.3)));
        assert!(!ob.is_tapped_by(&bear(at(4), 1.11, 1.3)));
    }

    #[test]
    fn test_mitigation_is_monotonic() {
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..100 {
            let trend = if rng.gen_bool(0.5) { Trend::Bullish } else { Trend::Bearish };
            let ob = Poi {
                trend,
                time: at(0),
                index: 0,
                zone: PoiZone::OrderBlock { price_low: 0.99, price_high: 1.01 },
                state: PoiState::Active,
            };
            let candles: Vec<Candle> = (0..30)
                .map(|i| {
                    let mid = 1.0 + rng.gen_range(-0.03..0.03);
                    let half = rng.gen_range(0.001..0.01);
                    bull(at(0) + Duration::hours(4 * i), mid - half, mid + half)
                })
                .collect();

            let mut was_mitigated = false;
            for i in 0..=candles.len() {
                let now = ob.is_mitigated_by(&candles[..i]);
                assert!(!(was_mitigated && !now), "re-validated after pierce at {}", i);
                was_mitigated = now;
            }
        }
    }
}
